pub mod acquire;
pub mod scripted;
pub mod wims;

#[cfg(test)]
pub(crate) mod fixtures;
