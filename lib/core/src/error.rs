//! Shared result alias.
//!
//! Library seams return plain domain enums. Process-level code, where
//! failures are reported rather than matched on, uses [`Result`] with the
//! binary's context type as `C`.

use rootcause::Report;

/// A Result whose error is a rootcause report carrying context `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Startup;

    impl fmt::Display for Startup {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "startup failed")
        }
    }

    impl std::error::Error for Startup {}

    fn start(ok: bool) -> Result<u16, Startup> {
        if !ok {
            return Err(Startup.into());
        }
        Ok(8080)
    }

    #[test]
    fn context_converts_into_report() {
        assert_eq!(start(true).expect("should start"), 8080);
        assert!(start(false).is_err());
    }
}
