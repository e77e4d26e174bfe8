pub mod form;
pub mod prelude;

#[cfg(test)]
mod test_public_api;
