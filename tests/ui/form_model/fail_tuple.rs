#![allow(dead_code)]

#[derive(calmform::form::FormModel)]
struct Pair(String, String);

fn main() {}
