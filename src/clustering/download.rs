// Fetches the sentence embedding model from HuggingFace.
//
// Two files are needed: the ONNX export and its tokenizer. They are stored
// under <model_dir>/<model_name>/ in the platform data directory
// (~/.local/share/chaff/models/ on Linux) so they survive between runs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// Model identifier used when none is configured.
pub const DEFAULT_MODEL_NAME: &str = "all-MiniLM-L6-v2";

/// HuggingFace path of the ONNX export within the model repo.
const REMOTE_MODEL_FILE: &str = "onnx/model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";
/// Local file name of the ONNX export.
const MODEL_FILE: &str = "model.onnx";

fn remote_base_url(model_name: &str) -> String {
    format!("https://huggingface.co/sentence-transformers/{model_name}/resolve/main")
}

/// Default directory for model files.
pub fn default_model_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chaff")
        .join("models")
}

/// Directory holding one model's files.
pub fn embedding_model_dir(base: &Path, model_name: &str) -> PathBuf {
    base.join(model_name)
}

/// Whether both model files are already on disk.
pub fn embedding_files_present(base: &Path, model_name: &str) -> bool {
    let dir = embedding_model_dir(base, model_name);
    dir.join(MODEL_FILE).exists() && dir.join(TOKENIZER_FILE).exists()
}

/// Download the tokenizer and ONNX model, skipping files that already exist.
pub async fn download_model(base: &Path, model_name: &str) -> Result<PathBuf> {
    let dir = embedding_model_dir(base, model_name);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create model directory: {}", dir.display()))?;

    println!("\nSentence embedding model ({model_name}):");
    let base_url = remote_base_url(model_name);

    let downloads = [
        (TOKENIZER_FILE, TOKENIZER_FILE, false),
        (REMOTE_MODEL_FILE, MODEL_FILE, true),
    ];

    for (remote, local, large) in downloads {
        let dest = dir.join(local);
        if dest.exists() {
            info!(file = local, "Model file already exists, skipping");
            println!("  {local} (already exists)");
            continue;
        }

        println!("  Downloading {local}...");
        download_file(&format!("{base_url}/{remote}"), &dest, large).await?;
    }

    Ok(dir)
}

async fn download_file(url: &str, dest: &Path, show_progress: bool) -> Result<()> {
    let response = reqwest::Client::new()
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to download {url}"))?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    let progress = if show_progress {
        Some(progress_bar(response.content_length())?)
    } else {
        None
    };

    let bytes = response
        .bytes()
        .await
        .context("Failed to read response body")?;

    if let Some(pb) = &progress {
        pb.set_position(bytes.len() as u64);
    }

    std::fs::write(dest, &bytes).with_context(|| format!("Failed to write {}", dest.display()))?;

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    info!(url, dest = %dest.display(), "Downloaded model file");
    Ok(())
}

fn progress_bar(total_size: Option<u64>) -> Result<ProgressBar> {
    let pb = match total_size {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("    [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                    .context("Invalid progress template")?
                    .progress_chars("=> "),
            );
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("    {spinner} {bytes}")
                    .context("Invalid progress template")?,
            );
            pb
        }
    };
    Ok(pb)
}
