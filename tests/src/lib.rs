//! Cross-component scenarios run against the in-process gateway fakes.

#[cfg(test)]
mod unit;
