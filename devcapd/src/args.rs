//! Command-line arguments

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostArgsError {
    #[error("Missing value for {0}")]
    MissingValue(&'static str),

    #[error("Unknown option: {0}")]
    UnknownOption(String),
}

/// Parsed host arguments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostArgs {
    /// Boot configuration file; the built-in QEMU `virt` layout when absent
    pub config: Option<PathBuf>,
    /// JSON-lines audit trail; kept in memory when absent
    pub audit_out: Option<PathBuf>,
    /// Map the first page of every granted window after distribution
    pub probe: bool,
    pub help: bool,
}

impl HostArgs {
    /// Parses arguments, not including the program name
    pub fn parse<I, S>(args: I) -> Result<Self, HostArgsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = HostArgs::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_ref() {
                "--config" | "-c" => {
                    let value = args.next().ok_or(HostArgsError::MissingValue("--config"))?;
                    parsed.config = Some(PathBuf::from(value.as_ref()));
                }
                "--audit-out" | "-a" => {
                    let value = args
                        .next()
                        .ok_or(HostArgsError::MissingValue("--audit-out"))?;
                    parsed.audit_out = Some(PathBuf::from(value.as_ref()));
                }
                "--probe" => parsed.probe = true,
                "--help" | "-h" => parsed.help = true,
                other => return Err(HostArgsError::UnknownOption(other.to_string())),
            }
        }

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = HostArgs::parse(Vec::<String>::new()).unwrap();
        assert_eq!(args, HostArgs::default());
    }

    #[test]
    fn test_all_options() {
        let args = HostArgs::parse([
            "--config",
            "boot.json",
            "-a",
            "audit.jsonl",
            "--probe",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("boot.json")));
        assert_eq!(args.audit_out, Some(PathBuf::from("audit.jsonl")));
        assert!(args.probe);
        assert!(!args.help);
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            HostArgs::parse(["--config"]),
            Err(HostArgsError::MissingValue("--config"))
        );
        assert_eq!(
            HostArgs::parse(["--verbose"]),
            Err(HostArgsError::UnknownOption("--verbose".to_string()))
        );
    }
}
