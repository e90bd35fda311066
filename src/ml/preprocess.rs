//! 画像の前処理
//!
//! 任意サイズ・任意カラーモードの画像を、モデル入力用の
//! (1, 224, 224, 3) テンソルに変換します。

use image::{imageops::FilterType, DynamicImage};

use crate::error::InvalidImageError;
use crate::ml::ml_model::IMAGE_SIZE;

/// モデル入力の形状 [batch, height, width, channels]
pub const INPUT_SHAPE: [usize; 4] = [1, IMAGE_SIZE, IMAGE_SIZE, 3];

/// 正規化済み画像テンソル
///
/// 値は [0, 1]、NHWC 順で平坦化されています。
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
    shape: [usize; 4],
}

impl ImageTensor {
    /// 形状と要素数が一致しない場合は `None`
    pub fn from_raw(data: Vec<f32>, shape: [usize; 4]) -> Option<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return None;
        }
        Some(Self { data, shape })
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// (y, x, c) の値
    pub fn get(&self, y: usize, x: usize, c: usize) -> Option<f32> {
        let [_, h, w, ch] = self.shape;
        if y >= h || x >= w || c >= ch {
            return None;
        }
        self.data.get((y * w + x) * ch + c).copied()
    }
}

/// デコード済み画像をモデル入力テンソルに変換
///
/// 1. RGBに変換（アルファは破棄、グレースケールは3チャンネルに展開）
/// 2. 224x224 にバイリニアでリサイズ（アスペクト比は保持しない）
/// 3. 255で割って [0, 1] にスケーリング
/// 4. 先頭にバッチ次元を追加
pub fn preprocess(image: &DynamicImage) -> ImageTensor {
    let rgb = image.to_rgb8();
    let size = IMAGE_SIZE as u32;
    let resized = image::imageops::resize(&rgb, size, size, FilterType::Triangle);

    let data: Vec<f32> = resized
        .pixels()
        .flat_map(|p| p.0)
        .map(|v| v as f32 / 255.0)
        .collect();

    ImageTensor {
        data,
        shape: INPUT_SHAPE,
    }
}

/// アップロードされたバイト列をデコードして前処理
pub fn preprocess_bytes(bytes: &[u8]) -> Result<ImageTensor, InvalidImageError> {
    let image = image::load_from_memory(bytes)?;
    Ok(preprocess(&image))
}
