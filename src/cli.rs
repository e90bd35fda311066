use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::model::DeviceType;

#[derive(Parser, Debug)]
#[command(name = "durian_leaf", version, about = "Durian leaf disease classifier")]
pub struct Cli {
    /// 設定ファイル（省略時は ./config.json、無ければデフォルト設定）
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 計算デバイスを上書き
    #[arg(long, global = true, value_enum)]
    pub device: Option<DeviceArg>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Webアプリを起動
    Serve {
        /// 待ち受けアドレス（例: 0.0.0.0:8501）
        #[arg(long)]
        bind: Option<String>,
        /// モデルファイルのパス
        #[arg(long)]
        model: Option<String>,
    },
    /// 画像ファイルを1枚分類して結果を表示
    Classify {
        image: PathBuf,
        #[arg(long)]
        model: Option<String>,
        /// 結果をJSONで出力
        #[arg(long)]
        json: bool,
    },
    /// モデルファイルが無ければダウンロード
    Download {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
    /// モデルファイルの情報を表示
    Inspect {
        model: Option<String>,
    },
    /// 未学習の初期モデルを書き出す（動作確認用）
    InitModel {
        /// 出力先（.tar.gz ならアーカイブ形式、.mpk なら単一ファイル形式）
        output: PathBuf,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceArg {
    Cpu,
    Wgpu,
}

impl From<DeviceArg> for DeviceType {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Cpu => DeviceType::Cpu,
            DeviceArg::Wgpu => DeviceType::Wgpu,
        }
    }
}
