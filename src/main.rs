use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::Parser;

use durian_leaf_lib::cli::{Cli, Commands};
use durian_leaf_lib::labels::{build_label_map, ClassIndex};
use durian_leaf_lib::ml::{save_initial_archive, save_single_file, ModelCache, ModelConfig};
use durian_leaf_lib::model::{
    ensure_model_artifact, load_metadata, print_metadata_info, AppConfig, ModelFormat,
};
use durian_leaf_lib::{classify_commands, logging, render, ClassificationPipeline};

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load_or_default(&config_path)
        .context(format!("設定ファイルの読み込みエラー: {:?}", config_path))?;
    if let Some(device) = cli.device {
        config.set_device_type(device.into());
    }

    match cli.command {
        Commands::Serve { bind, model } => {
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            if let Some(model) = model {
                config.set_model_path(model);
            }
            run_server(config)
        }
        Commands::Classify { image, model, json } => {
            if let Some(model) = model {
                config.set_model_path(model);
            }
            classify_file(&config, &image, json)
        }
        Commands::Download { url, model } => {
            if let Some(url) = url {
                config.model.model_url = Some(url);
            }
            if let Some(model) = model {
                config.set_model_path(model);
            }
            config.validate()?;
            let path = ensure_model_artifact(
                Path::new(&config.model.model_path),
                config.model.model_url.as_deref(),
                config.model.download_timeout(),
            )?;
            println!("モデルファイル: {}", path.display());
            Ok(())
        }
        Commands::Inspect { model } => {
            let path = PathBuf::from(model.unwrap_or_else(|| config.model.model_path.clone()));
            inspect(&path, config.model.format)
        }
        Commands::InitModel { output } => init_model(&config, &output),
    }
}

/// パイプラインを同期的に組み立ててからサーバーを起動
fn run_server(config: AppConfig) -> Result<()> {
    config.display();

    let cache = ModelCache::new();
    let pipeline = ClassificationPipeline::from_config(&config, &cache)
        .context("起動時の初期化に失敗しました")?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(classify_commands::serve(Arc::new(pipeline), &config.server))
}

fn classify_file(config: &AppConfig, image: &Path, json: bool) -> Result<()> {
    let cache = ModelCache::new();
    let pipeline = ClassificationPipeline::from_config(config, &cache)?;

    let bytes = std::fs::read(image).context(format!("画像ファイルの読み込みエラー: {:?}", image))?;
    let classification = pipeline.classify(&bytes)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&classification)?);
        return Ok(());
    }

    println!("{}", render::result_headline(&classification.prediction));
    match &classification.record {
        Some(record) => {
            println!("\nDescription\n  {}", record.description);
            println!("\nCommon Symptoms");
            for symptom in &record.symptoms {
                println!("  - {}", symptom);
            }
            println!("\nCauses");
            for cause in &record.causes {
                println!("  - {}", cause);
            }
            println!("\nRecommended Treatment");
            for (i, recommendation) in record.recommendations.iter().enumerate() {
                println!("  {}. {}", i + 1, recommendation);
            }
        }
        None => println!("Disease information is not available for this result."),
    }
    Ok(())
}

fn inspect(path: &Path, format: ModelFormat) -> Result<()> {
    let size = std::fs::metadata(path)
        .context(format!("モデルファイルが見つかりません: {:?}", path))?
        .len();
    println!("モデルファイル: {} ({} bytes)", path.display(), size);

    match format.resolve(path) {
        ModelFormat::Archive => {
            let metadata = load_metadata(path)?;
            print_metadata_info(&metadata);
        }
        _ => println!("単一ファイル形式のためメタデータはありません"),
    }
    Ok(())
}

fn init_model(config: &AppConfig, output: &Path) -> Result<()> {
    let label_map = build_label_map(ClassIndex::load(&config.class_index_path)?)?;
    let device = NdArrayDevice::Cpu;

    match ModelFormat::Auto.resolve(output) {
        ModelFormat::Archive => {
            let metadata =
                save_initial_archive::<NdArray<f32>>(output, label_map.labels().to_vec(), &device)?;
            print_metadata_info(&metadata);
        }
        _ => {
            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let model = ModelConfig::new(label_map.len()).init::<NdArray<f32>>(&device);
            save_single_file(model, output)?;
        }
    }
    println!("初期モデルを書き出しました: {}", output.display());
    Ok(())
}
