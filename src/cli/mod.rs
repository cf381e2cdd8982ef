pub mod contexts;
pub mod status;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use kpack::config::EmbeddingConfig;
use kpack::embedding::ProviderKind;
use std::path::Path;
use tokio::io::AsyncWriteExt;

const HF_BASE_URL: &str = "https://huggingface.co/sentence-transformers";

/// Download the ONNX model and tokenizer for the configured local model.
pub async fn model_download(config: &EmbeddingConfig) -> Result<()> {
    let spec = config.to_spec()?;
    if spec.provider != ProviderKind::Local {
        println!(
            "Provider `{}` serves its own models; pull `{}` there instead.",
            spec.provider, spec.model
        );
        return Ok(());
    }

    let cache_dir = &spec.cache_dir;
    std::fs::create_dir_all(cache_dir)
        .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;

    let files = [
        ("model.onnx", format!("{HF_BASE_URL}/{}/resolve/main/onnx/model.onnx", spec.model)),
        ("tokenizer.json", format!("{HF_BASE_URL}/{}/resolve/main/tokenizer.json", spec.model)),
    ];

    for (name, url) in &files {
        let dest = cache_dir.join(name);
        if dest.exists() {
            println!("{name} already exists at {}", dest.display());
            continue;
        }
        println!("Downloading {name} for {}...", spec.model);
        download_file(url, &dest).await?;
        println!("Saved to {}", dest.display());
    }

    println!("Model download complete.");
    Ok(())
}

/// Stream `url` into `dest` behind a progress bar. Writes to a temp file and renames.
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let mut response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download of {url} failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")?
                    .progress_chars("##-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    while let Some(chunk) = response.chunk().await.context("error reading response")? {
        file.write_all(&chunk)
            .await
            .context("error writing to file")?;
        pb.inc(chunk.len() as u64);
    }

    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}
