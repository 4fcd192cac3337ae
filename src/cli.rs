use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show critical errors
    Quiet,
    /// Show standard information
    #[default]
    Normal,
    /// Show detailed information
    Verbose,
    /// Show all available debugging information
    Debug,
}

/// Rule-driven XML rewriting tool
#[derive(Parser, Debug, Clone)]
#[command(name = "rewrite-xml")]
#[command(about = "Apply conditional XPath rewrite rules to a directory of XML files")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config", help = "Configuration file (TOML or JSON)")]
    pub config: Option<PathBuf>,

    /// Override the input directory from the configuration
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Override the output directory from the configuration
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Number of files processed concurrently
    #[arg(
        short = 't',
        long = "threads",
        help = "Number of files processed concurrently"
    )]
    pub threads: Option<usize>,

    /// Indent the rewritten documents
    #[arg(long = "pretty-print")]
    pub pretty_print: bool,

    /// Enable verbose output (repeat for debug output)
    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        help = "Enable verbose output (-vv for debug)"
    )]
    pub verbose: u8,

    /// Enable quiet mode (errors only)
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Quiet mode",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(config) = &self.config
            && !config.is_file()
        {
            return Err(format!(
                "Configuration file does not exist: {}",
                config.display()
            ));
        }
        if let Some(threads) = self.threads
            && threads == 0
        {
            return Err("Number of threads must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        match (self.quiet, self.verbose) {
            (true, _) => VerbosityLevel::Quiet,
            (false, 0) => VerbosityLevel::Normal,
            (false, 1) => VerbosityLevel::Verbose,
            (false, _) => VerbosityLevel::Debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_basic_cli_parsing() {
        let args = vec!["rewrite-xml", "--config", "rules.toml"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("rules.toml")));
        assert_eq!(cli.input, None);
        assert!(!cli.pretty_print);
        assert_eq!(cli.verbosity(), VerbosityLevel::Normal);
    }

    #[test]
    fn test_overrides_and_verbosity() {
        let cli = Cli::try_parse_from([
            "rewrite-xml",
            "-i",
            "in",
            "-o",
            "out",
            "-t",
            "8",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.input, Some(PathBuf::from("in")));
        assert_eq!(cli.output, Some(PathBuf::from("out")));
        assert_eq!(cli.threads, Some(8));
        assert_eq!(cli.verbosity(), VerbosityLevel::Debug);

        let cli = Cli::try_parse_from(["rewrite-xml", "-q"]).unwrap();
        assert_eq!(cli.verbosity(), VerbosityLevel::Quiet);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["rewrite-xml", "-q", "-v"]).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_threads_and_missing_config() {
        let cli = Cli::try_parse_from(["rewrite-xml", "-t", "0"]).unwrap();
        assert!(cli.validate().is_err());

        let cli = Cli::try_parse_from(["rewrite-xml", "-c", "/nonexistent/rules.toml"]).unwrap();
        assert!(cli.validate().unwrap_err().contains("does not exist"));

        let cli = Cli::try_parse_from(["rewrite-xml"]).unwrap();
        assert!(cli.validate().is_ok());
    }
}
