use calmform::form::{FieldValue, FormModel};

#[derive(Clone, Debug, PartialEq, calmform::form::FormModel)]
struct SignupForm {
    email: String,
    age: i64,
    terms: bool,
}

fn main() {
    let fields = SignupForm::fields();
    assert_eq!(fields.email().as_str(), "email");

    let values = SignupForm {
        email: "a@calm.form".to_string(),
        age: 30,
        terms: true,
    }
    .into_values();
    assert_eq!(values.get("terms"), Some(&FieldValue::Bool(true)));

    let model = SignupForm::from_values(&values.with("email", "b@calm.form"));
    assert_eq!(
        model,
        Some(SignupForm {
            email: "b@calm.form".to_string(),
            age: 30,
            terms: true,
        })
    );
}
