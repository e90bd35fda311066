//! 分類パイプライン
//!
//! 画像バイト列 → 前処理 → 推論 → ラベル解決 → 病害情報の検索 を1つにまとめます。
//! 起動時に1回だけ組み立て、以降は全リクエストで共有します。

use std::path::Path;
use std::sync::Arc;

use crate::error::ClassifierError;
use crate::knowledge::{lookup, KnowledgeBase};
use crate::labels::{build_label_map, ClassIndex, LabelMap};
use crate::ml::{
    load_classifier, preprocess_bytes, resolve, ImageClassifier, ImageTensor, ModelCache, INPUT_SHAPE,
};
use crate::model::{ensure_model_artifact, AppConfig};
use crate::types::Classification;

pub struct ClassificationPipeline {
    classifier: Arc<dyn ImageClassifier>,
    label_map: LabelMap,
    knowledge_base: KnowledgeBase,
}

impl ClassificationPipeline {
    pub fn new(
        classifier: Arc<dyn ImageClassifier>,
        label_map: LabelMap,
        knowledge_base: KnowledgeBase,
    ) -> Self {
        if classifier.num_classes() != label_map.len() {
            tracing::warn!(
                model_classes = classifier.num_classes(),
                labels = label_map.len(),
                "label map size differs from model output; unmapped indices resolve to UNKNOWN"
            );
        }
        Self {
            classifier,
            label_map,
            knowledge_base,
        }
    }

    /// 設定からパイプラインを組み立てる
    ///
    /// 必要ならモデルをダウンロードし、キャッシュ経由で1回だけ読み込みます。
    /// どの段階の失敗も致命的で、呼び出し側は起動を中止します。
    pub fn from_config(config: &AppConfig, cache: &ModelCache) -> Result<Self, ClassifierError> {
        let settings = &config.model;
        ensure_model_artifact(
            Path::new(&settings.model_path),
            settings.model_url.as_deref(),
            settings.download_timeout(),
        )?;

        let classifier = cache.get_or_load(|| load_classifier(settings, config.device_type))?;
        // 前処理の出力形状と一致しないモデルは起動時に弾く
        if classifier.input_shape() != INPUT_SHAPE {
            return Err(ClassifierError::InputShapeMismatch {
                expected: classifier.input_shape(),
                actual: INPUT_SHAPE,
            });
        }

        let class_index = ClassIndex::load(&config.class_index_path)?;
        let label_map = build_label_map(class_index)?;

        let knowledge_base = match &config.knowledge_base_path {
            Some(path) => KnowledgeBase::load(path)?,
            None => KnowledgeBase::embedded()?,
        };

        tracing::info!(
            classes = label_map.len(),
            records = knowledge_base.len(),
            "classification pipeline ready"
        );
        Ok(Self::new(classifier, label_map, knowledge_base))
    }

    /// アップロードされた画像を分類
    ///
    /// デコードできない画像は `InvalidImage`（このリクエストのみ失敗）。
    pub fn classify(&self, image_bytes: &[u8]) -> Result<Classification, ClassifierError> {
        let tensor = preprocess_bytes(image_bytes)?;
        self.classify_tensor(&tensor)
    }

    pub fn classify_tensor(&self, tensor: &ImageTensor) -> Result<Classification, ClassifierError> {
        let probabilities = self.classifier.predict(tensor)?;
        let prediction = resolve(&probabilities, &self.label_map);
        let record = lookup(&prediction.predicted_label, &self.knowledge_base).cloned();

        tracing::debug!(
            label = %prediction.predicted_label,
            confidence = prediction.confidence,
            has_record = record.is_some(),
            "classified image"
        );
        Ok(Classification { prediction, record })
    }

    pub fn label_map(&self) -> &LabelMap {
        &self.label_map
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.knowledge_base
    }

    pub fn num_classes(&self) -> usize {
        self.classifier.num_classes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::LeafClass;
    use crate::ml::{save_archive, ModelConfig, CLASS_NAMES};
    use crate::model::download::test_server::serve_once;
    use crate::model::ModelMetadata;
    use crate::types::ProbabilityVector;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    /// 常に同じ確率ベクトルを返す分類器
    struct FixedClassifier(Vec<f32>);

    impl ImageClassifier for FixedClassifier {
        fn input_shape(&self) -> [usize; 4] {
            INPUT_SHAPE
        }

        fn num_classes(&self) -> usize {
            self.0.len()
        }

        fn predict(&self, tensor: &ImageTensor) -> Result<ProbabilityVector, ClassifierError> {
            if tensor.shape() != INPUT_SHAPE {
                return Err(ClassifierError::InputShapeMismatch {
                    expected: INPUT_SHAPE,
                    actual: tensor.shape(),
                });
            }
            Ok(self.0.clone())
        }
    }

    fn pipeline_with(probabilities: Vec<f32>) -> ClassificationPipeline {
        let class_index = ClassIndex::from_json_str(include_str!("../class_indices.json")).unwrap();
        ClassificationPipeline::new(
            Arc::new(FixedClassifier(probabilities)),
            build_label_map(class_index).unwrap(),
            KnowledgeBase::embedded().unwrap(),
        )
    }

    fn png_bytes() -> Vec<u8> {
        let img = ImageBuffer::from_fn(640, 480, |x, _| Rgb([30, (x % 256) as u8, 40]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_healthy_leaf_end_to_end() {
        let pipeline = pipeline_with(vec![0.01, 0.02, 0.93, 0.03, 0.01]);
        let result = pipeline.classify(&png_bytes()).unwrap();

        assert_eq!(result.prediction.predicted_label, "HEALTHY_LEAF");
        assert_eq!(result.prediction.class_index, 2);
        assert!((result.prediction.confidence - 0.93).abs() < 1e-6);

        let expected = KnowledgeBase::embedded()
            .unwrap()
            .get(LeafClass::HealthyLeaf)
            .cloned()
            .unwrap();
        assert_eq!(result.record, Some(expected));
    }

    #[test]
    fn test_invalid_image_is_request_error() {
        let pipeline = pipeline_with(vec![0.2; 5]);
        let err = pipeline.classify(b"plain text, not a picture").unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidImage(_)));
        assert!(err.is_request_error());

        // 失敗後も同じパイプラインで分類できる
        assert!(pipeline.classify(&png_bytes()).is_ok());
    }

    #[test]
    fn test_unmapped_index_has_no_record() {
        let pipeline = pipeline_with(vec![0.0, 0.0, 0.0, 0.0, 0.1, 0.9]);
        let result = pipeline.classify(&png_bytes()).unwrap();
        assert!(result.prediction.is_unknown());
        assert_eq!(result.record, None);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let pipeline = pipeline_with(vec![0.6, 0.1, 0.1, 0.1, 0.1]);
        let bytes = png_bytes();
        assert_eq!(pipeline.classify(&bytes).unwrap(), pipeline.classify(&bytes).unwrap());
    }

    #[test]
    fn test_from_config_without_model_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.model.model_path = dir.path().join("absent.tar.gz").to_string_lossy().to_string();

        let cache = ModelCache::new();
        let err = ClassificationPipeline::from_config(&config, &cache).err().unwrap();
        assert!(matches!(err, ClassifierError::Download(_)));
        assert!(!cache.is_loaded());
    }

    /// クラスインデックスをtempdirに書き出し、そのパスを指す設定を返す
    fn config_in(dir: &Path, model_path: &Path) -> AppConfig {
        let index_path = dir.join("class_indices.json");
        std::fs::write(&index_path, include_str!("../class_indices.json")).unwrap();

        let mut config = AppConfig::default();
        config.model.model_path = model_path.to_string_lossy().to_string();
        config.class_index_path = index_path.to_string_lossy().to_string();
        config
    }

    #[test]
    fn test_from_config_download_not_found_is_fatal() {
        let (url, server) = serve_once("404 Not Found", b"missing".to_vec());
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("leaf.tar.gz");
        let mut config = config_in(dir.path(), &model_path);
        config.model.model_url = Some(url);

        let cache = ModelCache::new();
        let err = ClassificationPipeline::from_config(&config, &cache).err().unwrap();
        server.join().unwrap();

        assert!(matches!(err, ClassifierError::Download(_)));
        assert!(!err.is_request_error());
        assert!(!cache.is_loaded());
        assert!(!model_path.exists());
    }

    #[test]
    fn test_from_config_rejects_other_input_size() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("leaf_64.tar.gz");
        let device = NdArrayDevice::Cpu;
        let labels: Vec<String> = CLASS_NAMES.iter().map(|s| s.to_string()).collect();
        let model = ModelConfig::new(labels.len())
            .with_image_size(64)
            .init::<NdArray<f32>>(&device);
        save_archive(model, &ModelMetadata::new(labels, 64, 0), &model_path).unwrap();

        let config = config_in(dir.path(), &model_path);
        let cache = ModelCache::new();
        let err = ClassificationPipeline::from_config(&config, &cache).err().unwrap();

        match err {
            ClassifierError::InputShapeMismatch { expected, actual } => {
                assert_eq!(expected, [1, 64, 64, 3]);
                assert_eq!(actual, INPUT_SHAPE);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_from_config_with_initial_model() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("leaf.tar.gz");
        let labels = CLASS_NAMES.iter().map(|s| s.to_string()).collect();
        crate::ml::save_initial_archive::<NdArray<f32>>(&model_path, labels, &NdArrayDevice::Cpu)
            .unwrap();

        let config = config_in(dir.path(), &model_path);

        let cache = ModelCache::new();
        let pipeline = ClassificationPipeline::from_config(&config, &cache).unwrap();
        assert_eq!(pipeline.num_classes(), 5);
        assert_eq!(pipeline.label_map().len(), 5);
        assert!(cache.is_loaded());

        let result = pipeline.classify(&png_bytes()).unwrap();
        assert!(!result.prediction.is_unknown());
        assert!(result.record.is_some());
    }
}
