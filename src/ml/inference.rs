//! モデル推論機能
//!
//! モデルファイルの形式ごとの読み込み（[`ModelLoader`]）と、
//! 読み込んだモデルで確率ベクトルを計算する推論エンジンを提供します。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkBytesRecorder, NamedMpkFileRecorder, Recorder},
    tensor::{backend::Backend, Tensor, TensorData},
};
use burn_ndarray::{NdArray, NdArrayDevice};

use crate::error::{ClassifierError, ModelLoadError};
use crate::ml::ml_model::{LeafClassifier, ModelConfig, IMAGE_SIZE};
use crate::ml::preprocess::ImageTensor;
use crate::model::config::{DeviceType, ModelFormat, ModelSettings};
use crate::model::{load_model_with_metadata, save_model_with_metadata, ModelMetadata};
use crate::types::ProbabilityVector;

/// 画像分類器
///
/// 読み込み後は読み取り専用で、全リクエストから共有されます。
pub trait ImageClassifier: Send + Sync {
    /// 期待する入力形状 [1, height, width, 3]
    fn input_shape(&self) -> [usize; 4];

    /// 出力ベクトルの長さ
    fn num_classes(&self) -> usize;

    /// 確率ベクトル（長さN、合計≒1）を返す
    ///
    /// 入力形状がモデルと一致しない場合は `InputShapeMismatch`。
    fn predict(&self, tensor: &ImageTensor) -> Result<ProbabilityVector, ClassifierError>;
}

/// 読み込んだモデルと、その構築に使った設定
pub struct LoadedModel<B: Backend> {
    pub model: LeafClassifier<B>,
    pub config: ModelConfig,
    pub metadata: Option<ModelMetadata>,
}

/// モデルファイルの読み込み方法
pub trait ModelLoader<B: Backend> {
    fn load(&self, path: &Path, device: &B::Device) -> Result<LoadedModel<B>, ModelLoadError>;
}

/// tar.gz（metadata.json + model.mpk）形式
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveModelLoader;

impl<B: Backend> ModelLoader<B> for ArchiveModelLoader {
    fn load(&self, path: &Path, device: &B::Device) -> Result<LoadedModel<B>, ModelLoadError> {
        let (metadata, model_binary) =
            load_model_with_metadata(path).map_err(|e| ModelLoadError::new(path, format!("{:#}", e)))?;

        let config =
            ModelConfig::new(metadata.num_classes).with_image_size(metadata.model_input_size);

        let recorder = NamedMpkBytesRecorder::<FullPrecisionSettings>::default();
        let record = Recorder::<B>::load(&recorder, model_binary, device)
            .map_err(|e| ModelLoadError::new(path, format!("モデル重みの読み込みエラー: {:?}", e)))?;

        let model = config.init::<B>(device).load_record(record);

        Ok(LoadedModel {
            model,
            config,
            metadata: Some(metadata),
        })
    }
}

/// 重みだけの .mpk 形式
///
/// メタデータを持たないため、クラス数と入力サイズは設定から与えます。
#[derive(Debug, Clone, Copy)]
pub struct SingleFileModelLoader {
    pub num_classes: usize,
    pub image_size: usize,
}

impl SingleFileModelLoader {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            image_size: IMAGE_SIZE,
        }
    }
}

impl<B: Backend> ModelLoader<B> for SingleFileModelLoader {
    fn load(&self, path: &Path, device: &B::Device) -> Result<LoadedModel<B>, ModelLoadError> {
        if !path.exists() {
            return Err(ModelLoadError::new(path, "model file does not exist"));
        }
        // NamedMpkFileRecorder は拡張子を .mpk に置き換えて開く
        if path.extension().and_then(|e| e.to_str()) != Some("mpk") {
            return Err(ModelLoadError::new(
                path,
                "single-file models must use the .mpk extension",
            ));
        }

        let config = ModelConfig::new(self.num_classes).with_image_size(self.image_size);
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let model = config
            .init::<B>(device)
            .load_file(path.to_path_buf(), &recorder, device)
            .map_err(|e| ModelLoadError::new(path, format!("モデル重みの読み込みエラー: {:?}", e)))?;

        Ok(LoadedModel {
            model,
            config,
            metadata: None,
        })
    }
}

/// 形式に応じたローダーを返す
pub fn loader_for<B: Backend>(settings: &ModelSettings) -> Box<dyn ModelLoader<B>> {
    match settings.resolved_format() {
        ModelFormat::Archive => Box::new(ArchiveModelLoader),
        _ => Box::new(SingleFileModelLoader::new(settings.num_classes)),
    }
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: Mutex<LeafClassifier<B>>,
    device: B::Device,
    input_shape: [usize; 4],
    num_classes: usize,
    metadata: Option<ModelMetadata>,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルを読み込んで推論エンジンを初期化
    ///
    /// 読み込み直後にゼロ画像で1回推論し、重みとアーキテクチャの不整合をここで検出します。
    pub fn load(
        path: &Path,
        loader: &dyn ModelLoader<B>,
        device: B::Device,
    ) -> Result<Self, ModelLoadError> {
        let loaded = loader.load(path, &device)?;
        let engine = Self::from_loaded(loaded, device);
        engine.self_check().map_err(|detail| ModelLoadError::new(path, detail))?;

        tracing::info!(
            path = %path.display(),
            num_classes = engine.num_classes,
            input = ?engine.input_shape,
            "model loaded"
        );
        Ok(engine)
    }

    pub fn from_loaded(loaded: LoadedModel<B>, device: B::Device) -> Self {
        let size = loaded.config.image_size;
        Self {
            model: Mutex::new(loaded.model),
            device,
            input_shape: [1, size, size, 3],
            num_classes: loaded.config.num_classes,
            metadata: loaded.metadata,
        }
    }

    /// アーカイブ形式のメタデータ（単一ファイル形式では `None`）
    pub fn metadata(&self) -> Option<&ModelMetadata> {
        self.metadata.as_ref()
    }

    fn self_check(&self) -> Result<(), String> {
        let zeros = ImageTensor::from_raw(
            vec![0.0; self.input_shape.iter().product()],
            self.input_shape,
        )
        .ok_or_else(|| "invalid input shape".to_string())?;

        let output = catch_unwind(AssertUnwindSafe(|| self.predict(&zeros)))
            .map_err(|_| "weights do not match the model architecture".to_string())?
            .map_err(|e| e.to_string())?;

        if output.len() != self.num_classes {
            return Err(format!(
                "model produced {} outputs, expected {}",
                output.len(),
                self.num_classes
            ));
        }
        Ok(())
    }
}

impl<B: Backend> ImageClassifier for InferenceEngine<B> {
    fn input_shape(&self) -> [usize; 4] {
        self.input_shape
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, tensor: &ImageTensor) -> Result<ProbabilityVector, ClassifierError> {
        if tensor.shape() != self.input_shape {
            return Err(ClassifierError::InputShapeMismatch {
                expected: self.input_shape,
                actual: tensor.shape(),
            });
        }

        let data = TensorData::new(tensor.as_slice().to_vec(), tensor.shape());
        let input = Tensor::<B, 4>::from_data(data, &self.device);

        let model = self
            .model
            .lock()
            .map_err(|_| ClassifierError::Inference("model lock poisoned".to_string()))?;
        let probabilities = model.predict_proba(input);

        probabilities
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("推論結果の取得エラー: {:?}", e)))
    }
}

/// 一度だけモデルを読み込み、以降は同じインスタンスを返す
#[derive(Default)]
pub struct ModelCache {
    slot: Mutex<Option<Arc<dyn ImageClassifier>>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 読み込み済みならそれを返し、未読み込みなら `load` を1回だけ実行する
    ///
    /// 失敗した場合は何も保持しない。
    pub fn get_or_load<F>(&self, load: F) -> Result<Arc<dyn ImageClassifier>, ClassifierError>
    where
        F: FnOnce() -> Result<Arc<dyn ImageClassifier>, ClassifierError>,
    {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| ClassifierError::Inference("model cache lock poisoned".to_string()))?;

        if let Some(classifier) = slot.as_ref() {
            return Ok(Arc::clone(classifier));
        }

        let classifier = load()?;
        *slot = Some(Arc::clone(&classifier));
        Ok(classifier)
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}

/// 設定に従ってバックエンドを選び、モデルを読み込む
pub fn load_classifier(
    settings: &ModelSettings,
    device_type: DeviceType,
) -> Result<Arc<dyn ImageClassifier>, ClassifierError> {
    let path = Path::new(&settings.model_path);
    let format = settings.resolved_format();
    tracing::info!(path = %path.display(), %format, device = %device_type, "loading model");

    match device_type {
        DeviceType::Cpu => load_with::<NdArray<f32>>(path, settings, NdArrayDevice::Cpu),
        #[cfg(feature = "wgpu")]
        DeviceType::Wgpu => {
            load_with::<burn_wgpu::Wgpu>(path, settings, burn_wgpu::WgpuDevice::default())
        }
        #[cfg(not(feature = "wgpu"))]
        DeviceType::Wgpu => {
            tracing::warn!("built without the wgpu feature, falling back to CPU");
            load_with::<NdArray<f32>>(path, settings, NdArrayDevice::Cpu)
        }
    }
}

fn load_with<B: Backend>(
    path: &Path,
    settings: &ModelSettings,
    device: B::Device,
) -> Result<Arc<dyn ImageClassifier>, ClassifierError> {
    let loader = loader_for::<B>(settings);
    let engine = InferenceEngine::<B>::load(path, loader.as_ref(), device)?;
    Ok(Arc::new(engine))
}

/// 未学習の初期モデルをアーカイブ形式で書き出す（動作確認用）
pub fn save_initial_archive<B: Backend>(
    path: &Path,
    class_labels: Vec<String>,
    device: &B::Device,
) -> anyhow::Result<ModelMetadata> {
    let metadata = ModelMetadata::new(class_labels, IMAGE_SIZE, 0);
    let model = ModelConfig::new(metadata.num_classes).init::<B>(device);
    save_archive(model, &metadata, path)?;
    Ok(metadata)
}

/// モデルをアーカイブ形式で保存
pub fn save_archive<B: Backend>(
    model: LeafClassifier<B>,
    metadata: &ModelMetadata,
    path: &Path,
) -> anyhow::Result<()> {
    let recorder = NamedMpkBytesRecorder::<FullPrecisionSettings>::default();
    let model_binary = Recorder::<B>::record(&recorder, model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みの書き出しエラー: {:?}", e))?;
    save_model_with_metadata(path, metadata, &model_binary)
}

/// モデルを単一ファイル（.mpk）形式で保存
pub fn save_single_file<B: Backend>(model: LeafClassifier<B>, path: &Path) -> anyhow::Result<()> {
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .save_file(path.to_path_buf(), &recorder)
        .map_err(|e| anyhow::anyhow!("モデル重みの書き出しエラー: {:?}", e))
}
