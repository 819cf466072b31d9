//! One-shot command implementations

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use polyrun_common::{ExecutionResult, Language};
use polyrun_sandbox::{Orchestrator, PolyrunConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

pub struct RunArgs {
    pub language: Language,
    pub code: Option<String>,
    pub file: Option<PathBuf>,
    pub install: Vec<String>,
    pub fetch: bool,
    pub output: PathBuf,
    pub json: bool,
}

/// Load the runtime, run one snippet and report the result.
///
/// Exits with failure when the snippet raised an error.
pub async fn run(orchestrator: &Orchestrator, args: RunArgs) -> Result<ExitCode> {
    let code = read_code(args.code, args.file.as_deref()).await?;

    orchestrator
        .load_runtime(args.language)
        .await
        .with_context(|| format!("Failed to load the {} runtime", args.language))?;

    if !args.install.is_empty() {
        orchestrator
            .install_packages(args.language, &args.install)
            .await
            .with_context(|| format!("Failed to install {}", args.install.join(", ")))?;
        info!(packages = ?args.install, "Packages installed");
    }

    let result = orchestrator.execute_code(args.language, &code).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    save_artifacts(orchestrator, args.language, &result, args.fetch, &args.output).await?;

    Ok(if result.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Print the configuration, or write the defaults to the config path
pub fn config(path: Option<&Path>, write: bool) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => PolyrunConfig::config_path()?,
    };

    if write {
        if path.exists() {
            bail!("{} already exists", path.display());
        }
        PolyrunConfig::default().save_to(&path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let config = if path.exists() {
        PolyrunConfig::load_from(&path)?
    } else {
        debug!(path = %path.display(), "No configuration file, showing defaults");
        PolyrunConfig::default()
    };
    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn read_code(code: Option<String>, file: Option<&Path>) -> Result<String> {
    if let Some(code) = code {
        return Ok(code);
    }
    if let Some(file) = file {
        return tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()));
    }

    let mut code = String::new();
    tokio::io::stdin()
        .read_to_string(&mut code)
        .await
        .context("Failed to read code from stdin")?;
    Ok(code)
}

fn print_result(result: &ExecutionResult) {
    if !result.stdout.is_empty() {
        print!("{}", result.stdout);
        if !result.stdout.ends_with('\n') {
            println!();
        }
    }
    if !result.stderr.is_empty() {
        eprint!("{}", result.stderr);
        if !result.stderr.ends_with('\n') {
            eprintln!();
        }
    }
    if let Some(value) = &result.return_value {
        match value {
            serde_json::Value::String(text) => println!("{}", text),
            other => println!(
                "{}",
                serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string())
            ),
        }
    }
    if let Some(name) = &result.generated_filename {
        println!("Generated file: {}", name);
    }
}

async fn save_artifacts(
    orchestrator: &Orchestrator,
    language: Language,
    result: &ExecutionResult,
    fetch: bool,
    output: &Path,
) -> Result<()> {
    if let Some(image) = &result.plot_image {
        write_artifact(output, "plot.png", &image.data).await?;
    }

    if let Some(encoded) = &result.plot_image_base64 {
        let data = STANDARD
            .decode(encoded.trim())
            .context("Returned plot is not valid base64")?;
        write_artifact(output, "plot.png", &data).await?;
    }

    if let (true, Some(name)) = (fetch, &result.generated_filename) {
        let data = orchestrator
            .read_file(language, name)
            .await
            .ok_or_else(|| anyhow!("{} was not found in the {} sandbox", name, language))?;
        let file_name = Path::new(name)
            .file_name()
            .ok_or_else(|| anyhow!("Invalid file name: {}", name))?;
        write_artifact(output, &file_name.to_string_lossy(), &data).await?;
    }

    Ok(())
}

async fn write_artifact(directory: &Path, name: &str, data: &[u8]) -> Result<()> {
    tokio::fs::create_dir_all(directory)
        .await
        .with_context(|| format!("Failed to create {}", directory.display()))?;
    let path = directory.join(name);
    tokio::fs::write(&path, data)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    eprintln!("Saved {}", path.display());
    Ok(())
}
