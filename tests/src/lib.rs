//! End-to-end scenarios that exercise the client crates together against an
//! in-process HTTP double.

#[cfg(test)]
mod unit;
