mod shell;

use std::path::{Path, PathBuf};

use clap::{App, Arg};
use tracing_subscriber::EnvFilter;

use lib::{job_helpers::load_image, ExposureStack, RenderConfig};

fn main() {
    let matches = App::new("HDR Merge")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Nathan Vegdahl")
        .about("Merges bracketed LDR exposures into an HDRI")
        .arg(
            Arg::with_name("INPUT")
                .help("input image files")
                .multiple(true)
                .index(1),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .value_name("FILE")
                .help("Merges the inputs and writes a Radiance .hdr file, without starting the interactive shell")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("gamma")
                .long("gamma")
                .value_name("G")
                .help("Display gamma of the preview")
                .takes_value(true)
                .default_value("2.2"),
        )
        .arg(
            Arg::with_name("scale")
                .long("scale")
                .value_name("S")
                .help("Preview downscale factor")
                .takes_value(true)
                .default_value("1"),
        )
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of verbosity"),
        )
        .get_matches();

    init_logging(matches.occurrences_of("v"));

    let config = match parse_config(matches.value_of("gamma"), matches.value_of("scale")) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Error: {}", message);
            std::process::exit(2);
        }
    };

    let inputs: Vec<PathBuf> = matches
        .values_of("INPUT")
        .map(|v| v.map(PathBuf::from).collect())
        .unwrap_or_default();

    match batch_output(matches.value_of("output"), &inputs) {
        Some(output) => {
            if let Err(message) = merge_files(&inputs, output) {
                eprintln!("Error: {}", message);
                std::process::exit(1);
            }
        }
        None => shell::run(config, inputs),
    }
}

/// The export path for a non-interactive run.  That needs both an
/// output and something to merge; anything less goes to the shell.
fn batch_output<'a>(output: Option<&'a str>, inputs: &[PathBuf]) -> Option<&'a Path> {
    match output {
        Some(output) if !inputs.is_empty() => Some(Path::new(output)),
        _ => None,
    }
}

/// Log to stderr.  `RUST_LOG` wins over `-v` when set.
fn init_logging(verbosity: u64) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_config(gamma: Option<&str>, scale: Option<&str>) -> Result<RenderConfig, String> {
    let mut config = RenderConfig::default();
    if let Some(g) = gamma {
        config.gamma = match g.parse::<f32>() {
            Ok(g) if g.is_finite() && g > 0.0 => g,
            _ => return Err(format!("invalid gamma \"{}\".", g)),
        };
    }
    if let Some(s) = scale {
        config.scale = match s.parse::<usize>() {
            Ok(s) if s >= 1 => s,
            _ => return Err(format!("invalid scale \"{}\".", s)),
        };
    }
    Ok(config)
}

/// Non-interactive merge: load, order, and export in one go.
fn merge_files(inputs: &[PathBuf], output: &Path) -> Result<(), String> {
    let mut stack = ExposureStack::new();
    for path in inputs {
        let layer = load_image(path).map_err(|e| e.to_string())?;
        if layer.info.exposure.is_none() {
            tracing::warn!(
                "\"{}\" lacks the Exif data needed to compute its exposure; estimating from the image",
                path.to_string_lossy()
            );
        }
        stack
            .push(layer)
            .map_err(|e| format!("\"{}\": {}", path.to_string_lossy(), e))?;
    }
    stack.sort();
    stack.save_hdr(output).map_err(|e| e.to_string())?;
    tracing::info!("merged {} exposure(s)", stack.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_parsing() {
        let config = parse_config(Some("1.8"), Some("3")).unwrap();
        assert_eq!(config, RenderConfig { gamma: 1.8, scale: 3 });
        assert_eq!(parse_config(None, None).unwrap(), RenderConfig::default());
        assert!(parse_config(Some("0"), None).is_err());
        assert!(parse_config(Some("nope"), None).is_err());
        assert!(parse_config(None, Some("0")).is_err());
    }

    #[test]
    fn batch_needs_output_and_inputs() {
        let inputs = vec![PathBuf::from("a.png")];
        assert_eq!(batch_output(Some("out.hdr"), &inputs), Some(Path::new("out.hdr")));
        assert_eq!(batch_output(Some("out.hdr"), &[]), None);
        assert_eq!(batch_output(None, &inputs), None);
    }

    #[test]
    fn batch_merge_reports_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.hdr");
        let err = merge_files(&[dir.path().join("missing.png")], &out).unwrap_err();
        assert!(err.contains("missing.png"));
        assert!(!out.exists());
    }
}
