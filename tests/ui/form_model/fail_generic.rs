#![allow(dead_code)]

#[derive(calmform::form::FormModel)]
struct Generic<T> {
    value: T,
}

fn main() {}
