//! Test-only crate; see `tests/` for the integration suites.
