//! 機械学習モデルの共通定義
//!
//! 葉画像分類用のCNNモデルと関連する設定を提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};

/// クラス数
pub const NUM_CLASSES: usize = 5;

/// 画像サイズ
pub const IMAGE_SIZE: usize = 224;

/// クラス名の定義（class_indices.json と同じ順序）
pub const CLASS_NAMES: [&str; NUM_CLASSES] = [
    "ALGAL_LEAF_SPOT",
    "ALLOCARIDARA_ATTACK",
    "HEALTHY_LEAF",
    "LEAF_BLIGHT",
    "PHOMOPSIS_LEAF_SPOT",
];

/// 全結合層に入る直前の特徴マップサイズ
const POOLED_SIZE: usize = 4;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub image_size: usize,
}

impl ModelConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> LeafClassifier<B> {
        // Conv 3x3 (no padding) → Pool 2x2 を2回、Conv 3x3 を1回
        // 最後に適応平均プーリングで 4x4 に揃えるので、入力サイズに関わらず d は一定
        let d = 128 * POOLED_SIZE * POOLED_SIZE;
        let d_half = d / 2;

        tracing::debug!(
            image_size = self.image_size,
            num_classes = self.num_classes,
            feature_dim = d,
            "initializing leaf classifier"
        );

        LeafClassifier {
            conv1: Conv2dConfig::new([3, 32], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool1: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            conv2: Conv2dConfig::new([32, 64], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool2: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            conv3: Conv2dConfig::new([64, 128], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool3: AdaptiveAvgPool2dConfig::new([POOLED_SIZE, POOLED_SIZE]).init(),

            // 全結合層
            fc1: LinearConfig::new(d, d_half).init(device),
            fc2: LinearConfig::new(d_half, self.num_classes).init(device),

            activation: Relu::new(),
        }
    }
}

/// 葉画像分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 + ReLU + MaxPool 2x2} x 2層
/// - Conv 3x3 + ReLU + AdaptiveAvgPool (4x4)
/// - Flatten
/// - FC: 2048 -> 1024 + ReLU
/// - FC: 1024 -> num_classes
/// - Softmax (分類時)
///
/// 入力は前処理と同じ NHWC `[batch, size, size, 3]`。
#[derive(Module, Debug)]
pub struct LeafClassifier<B: Backend> {
    conv1: Conv2d<B>, // 3 -> 32
    pool1: MaxPool2d,
    conv2: Conv2d<B>, // 32 -> 64
    pool2: MaxPool2d,
    conv3: Conv2d<B>, // 64 -> 128
    pool3: AdaptiveAvgPool2d,

    fc1: Linear<B>,
    fc2: Linear<B>,

    activation: Relu,
}

impl<B: Backend> LeafClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, size, size, 3]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        // NHWC -> NCHW
        let x = images.permute([0, 3, 1, 2]);

        let x = self.conv1.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let x = self.conv3.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool3.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);

        self.fc2.forward(x)
    }

    /// クラスごとの確率 [batch_size, num_classes]
    pub fn predict_proba(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::{Distribution, Tensor};
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_output_shape_and_softmax() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(NUM_CLASSES).init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::random(
            [2, IMAGE_SIZE, IMAGE_SIZE, 3],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let probs = model.predict_proba(images);
        assert_eq!(probs.dims(), [2, NUM_CLASSES]);

        let values = probs.into_data().to_vec::<f32>().unwrap();
        for row in values.chunks(NUM_CLASSES) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4, "row sums to {}", sum);
            assert!(row.iter().all(|v| *v >= 0.0));
        }
    }

    #[test]
    fn test_smaller_input_size() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(3)
            .with_image_size(32)
            .init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::zeros([1, 32, 32, 3], &device);
        assert_eq!(model.forward(images).dims(), [1, 3]);
    }

    #[test]
    fn test_class_names_match_bundled_index() {
        let index = crate::labels::ClassIndex::from_json_str(include_str!("../../class_indices.json")).unwrap();
        let map = crate::labels::build_label_map(index).unwrap();
        assert_eq!(map.labels(), CLASS_NAMES.map(String::from).as_slice());
    }
}
