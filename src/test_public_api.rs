use crate::form::FormModel as _;

#[derive(Clone, Debug, PartialEq, crate::form::FormModel)]
struct ProfileForm {
    name: String,
    newsletter: bool,
}

#[test]
fn prelude_smoke_builds_a_validated_form() {
    use crate::prelude::*;

    let schema = validator(
        ValidatorSchema::new().field("name", FieldRules::new().required().min(2)),
    );
    let form = FormController::builder(FormValues::new().with("name", ""))
        .options(FormOptions::default().controlled())
        .validator(schema)
        .build()
        .expect("form builds");

    let name = form.register_input("name", RegisterOptions::default());
    name.on_change(&ChangeEvent::text("name", "J"));
    assert_eq!(
        form.snapshot().error("name"),
        Some("name must be at least 2 characters.")
    );
    assert!(!form.snapshot().valid);
}

#[test]
fn derived_models_round_trip_through_a_form() {
    use crate::prelude::*;

    let fields = ProfileForm::fields();
    assert_eq!(fields.name().as_str(), "name");

    let form = FormConfig::from_model(ProfileForm {
        name: "Ada".to_string(),
        newsletter: false,
    })
    .build()
    .expect("form builds");
    form.on_change(&ChangeEvent::checkbox("newsletter", true));

    assert_eq!(
        form.values_as::<ProfileForm>(),
        Some(ProfileForm {
            name: "Ada".to_string(),
            newsletter: true,
        })
    );
}

#[test]
fn options_deserialize_from_json() {
    use crate::form::{Debounce, FormOptions, InputMode, ValidationMode};

    let options = FormOptions::from_json(
        r#"{ "input_mode": "controlled", "validate_mode": "blur", "debounce": { "in": 20, "out": 0 } }"#,
    )
    .expect("options parse");
    assert_eq!(options.input_mode, InputMode::Controlled);
    assert_eq!(options.validate_mode, ValidationMode::OnBlur);
    assert_eq!(options.debounce, Some(Debounce::split(20, 0)));

    let options = FormOptions::from_json(r#"{ "debounce": 300 }"#).expect("options parse");
    assert_eq!(options.input_mode, InputMode::Uncontrolled);
    assert_eq!(options.validate_mode, ValidationMode::OnChange);
    assert_eq!(options.debounce, Some(Debounce::Uniform(300)));

    assert!(FormOptions::from_json(r#"{ "validate_mode": "never" }"#).is_err());
}
