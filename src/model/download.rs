//! モデルファイルのダウンロード
//!
//! ローカルにモデルが無い場合のみHTTPで取得します。
//! 途中で失敗した場合は `.part` ファイルを削除し、本来のパスには何も残しません。

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ModelDownloadError;

/// 1回の読み書きの単位
const CHUNK_SIZE: usize = 8 * 1024;

/// モデルファイルが無ければダウンロードする
///
/// 既に存在する場合は何もしません。URLが無く、ファイルも無い場合はエラー。
pub fn ensure_model_artifact(
    path: &Path,
    url: Option<&str>,
    timeout: Duration,
) -> Result<PathBuf, ModelDownloadError> {
    if path.exists() {
        tracing::debug!(path = %path.display(), "model artifact already present");
        return Ok(path.to_path_buf());
    }

    let url = url.ok_or_else(|| ModelDownloadError::NoSource(path.to_path_buf()))?;
    let bytes = download_to_file(url, path, timeout)?;
    tracing::info!(path = %path.display(), bytes, "model artifact downloaded");

    Ok(path.to_path_buf())
}

/// URLの内容を `path` に保存し、書き込んだバイト数を返す
pub fn download_to_file(url: &str, path: &Path, timeout: Duration) -> Result<u64, ModelDownloadError> {
    tracing::info!(url, path = %path.display(), "downloading model artifact");

    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ModelDownloadError::Request {
            url: url.to_string(),
            detail: e.to_string(),
        })?;

    let mut response = client.get(url).send().map_err(|e| ModelDownloadError::Request {
        url: url.to_string(),
        detail: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ModelDownloadError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ModelDownloadError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let temp_path = partial_path(path);
    let result = stream_to_file(url, &mut response, &temp_path)
        .and_then(|written| {
            std::fs::rename(&temp_path, path)
                .map(|_| written)
                .map_err(|source| ModelDownloadError::Write {
                    path: path.to_path_buf(),
                    source,
                })
        });

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}

fn stream_to_file<R: Read>(url: &str, body: &mut R, temp_path: &Path) -> Result<u64, ModelDownloadError> {
    let write_err = |source| ModelDownloadError::Write {
        path: temp_path.to_path_buf(),
        source,
    };

    let file = File::create(temp_path).map_err(write_err)?;
    let mut writer = BufWriter::new(file);
    let mut buffer = [0u8; CHUNK_SIZE];
    let mut written = 0u64;

    loop {
        let n = body.read(&mut buffer).map_err(|e| ModelDownloadError::Request {
            url: url.to_string(),
            detail: e.to_string(),
        })?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n]).map_err(write_err)?;
        written += n as u64;
    }

    writer.flush().map_err(write_err)?;
    writer
        .into_inner()
        .map_err(|e| write_err(e.into_error()))?
        .sync_all()
        .map_err(write_err)?;

    Ok(written)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}


#[cfg(test)]
mod tests {
    use super::test_server::serve_once;
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_not_found_is_fatal_and_writes_nothing() {
        let (url, server) = serve_once("404 Not Found", b"missing".to_vec());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.mpk");

        let err = ensure_model_artifact(&path, Some(&url), Duration::from_secs(10)).unwrap_err();
        server.join().unwrap();

        assert!(matches!(err, ModelDownloadError::Status { status: 404, .. }));
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn test_download_streams_body_to_disk() {
        // 複数チャンクにまたがるサイズ
        let body: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let (url, server) = serve_once("200 OK", body.clone());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.mpk");

        let result = ensure_model_artifact(&path, Some(&url), Duration::from_secs(10)).unwrap();
        server.join().unwrap();

        assert_eq!(result, path);
        assert_eq!(std::fs::read(&path).unwrap(), body);
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn test_existing_file_is_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.mpk");
        std::fs::write(&path, b"weights").unwrap();

        // 接続できないURLでも、ファイルがあれば触らない
        let result = ensure_model_artifact(&path, Some("http://127.0.0.1:9/none"), Duration::from_secs(1));
        assert_eq!(result.unwrap(), path);
        assert_eq!(std::fs::read(&path).unwrap(), b"weights");
    }

    #[test]
    fn test_missing_without_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.mpk");
        let err = ensure_model_artifact(&path, None, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ModelDownloadError::NoSource(_)));
    }

    #[test]
    fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.mpk");
        let url = format!("http://{}/model.mpk", addr);
        let err = ensure_model_artifact(&path, Some(&url), Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ModelDownloadError::Request { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("models/leaf.tar.gz")),
            PathBuf::from("models/leaf.tar.gz.part")
        );
    }
}
