//! Command-line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about = "Drop-folder OCR server with live progress streaming")]
pub struct Args {
    /// Directory watched for incoming documents
    #[arg(long, env = "SCANDROP_INPUT_DIR", default_value = "input")]
    pub input_dir: PathBuf,

    /// Directory for processed output, debug logs and success markers
    #[arg(long, env = "SCANDROP_OUTPUT_DIR", default_value = "output")]
    pub output_dir: PathBuf,

    /// Directory containing the upload page and static assets
    #[arg(long, env = "SCANDROP_RESOURCES_DIR", default_value = "resources")]
    pub resources_dir: PathBuf,

    /// Listen address for the web server
    #[arg(long, env = "SCANDROP_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Quiet period in seconds after a filesystem change before a
    /// processing run is triggered
    #[arg(long, env = "SCANDROP_DELAY", default_value_t = 5)]
    pub delay_secs: u64,

    /// Octal permission bits applied to produced output files
    #[arg(long, env = "SCANDROP_OUT_PERMISSIONS", default_value = "644")]
    pub out_permissions: String,

    /// Conversion command, invoked as `<command> <input> <output>`
    #[arg(long, env = "SCANDROP_OCR_COMMAND", default_value = "ocrmypdf")]
    pub ocr_command: String,

    /// Lower the default log filter to trace for this crate
    #[arg(short, long, env = "SCANDROP_VERBOSE")]
    pub verbose: bool,
}

impl Args {
    /// Output permission bits, parsed from the octal string form.
    pub fn out_mode(&self) -> Result<u32> {
        u32::from_str_radix(&self.out_permissions, 8)
            .with_context(|| format!("invalid permission bits: {}", self.out_permissions))
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    pub fn default_log_filter(&self) -> String {
        if self.verbose {
            "scandrop=trace,tower_http=debug".to_string()
        } else {
            "scandrop=debug,tower_http=info".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let args = Args::try_parse_from(["scandrop"]).unwrap();
        assert_eq!(args.listen_addr, "0.0.0.0:8080");
        assert_eq!(args.out_mode().unwrap(), 0o644);
        assert_eq!(args.delay(), Duration::from_secs(5));
    }

    #[test]
    fn permissions_are_octal() {
        let args = Args::try_parse_from(["scandrop", "--out-permissions", "600"]).unwrap();
        assert_eq!(args.out_mode().unwrap(), 0o600);
    }

    #[test]
    fn bad_permissions_are_rejected() {
        let args = Args::try_parse_from(["scandrop", "--out-permissions", "99x"]).unwrap();
        assert!(args.out_mode().is_err());
    }
}
