//! HTMLページの生成
//!
//! アップロードフォーム、分類結果カード、エラーページを文字列として組み立てます。

use std::fmt::Write;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::knowledge::DiseaseRecord;
use crate::types::{Classification, PredictionResult};

const TITLE: &str = "Durian Leaf Disease Classification";

/// ラベルを表示用に整形
///
/// `LEAF_BLIGHT` → `Leaf Blight`（アンダースコアを空白に、各単語の先頭だけ大文字）
pub fn display_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut at_word_start = true;
    for ch in label.chars() {
        let ch = if ch == '_' { ' ' } else { ch };
        if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}

/// 確信度をパーセント表記に（小数2桁）
pub fn format_confidence(confidence: f32) -> String {
    format!("{:.2}%", confidence * 100.0)
}

/// 結果の見出し
pub fn result_headline(prediction: &PredictionResult) -> String {
    format!(
        "Result: {} ({})",
        display_label(&prediction.predicted_label),
        format_confidence(prediction.confidence)
    )
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// トップページ（説明とアップロードフォーム）
pub fn index_page() -> String {
    layout(&format!(
        "{}\n<section class=\"notice\">Please upload a durian leaf image to start the analysis.</section>",
        upload_form()
    ))
}

/// 分類結果ページ
pub fn result_page(classification: &Classification, image_bytes: &[u8]) -> String {
    let mut body = upload_form();

    let _ = write!(
        body,
        "\n<figure class=\"preview\"><img src=\"{}\" alt=\"Uploaded image\"><figcaption>Uploaded image</figcaption></figure>",
        data_uri(image_bytes)
    );
    let _ = write!(
        body,
        "\n<p class=\"result\"><strong>{}</strong></p>",
        escape_html(&result_headline(&classification.prediction))
    );

    match &classification.record {
        Some(record) => body.push_str(&record_card(record)),
        None => body.push_str(
            "\n<section class=\"notice\">Disease information is not available for this result.</section>",
        ),
    }

    layout(&body)
}

/// エラーページ
pub fn error_page(message: &str) -> String {
    layout(&format!(
        "{}\n<section class=\"error\">{}</section>",
        upload_form(),
        escape_html(message)
    ))
}

fn record_card(record: &DiseaseRecord) -> String {
    let mut card = String::from("\n<section class=\"record\">");

    let _ = write!(
        card,
        "\n<h2>Description</h2>\n<p>{}</p>",
        escape_html(&record.description)
    );

    card.push_str("\n<h2>Common Symptoms</h2>");
    card.push_str(&list("ul", &record.symptoms));

    card.push_str("\n<h2>Causes</h2>");
    card.push_str(&list("ul", &record.causes));

    card.push_str("\n<h2>Recommended Treatment</h2>");
    card.push_str(&list("ol", &record.recommendations));

    card.push_str("\n</section>");
    card
}

fn list(tag: &str, items: &[String]) -> String {
    let mut out = format!("\n<{}>", tag);
    for item in items {
        let _ = write!(out, "<li>{}</li>", escape_html(item));
    }
    let _ = write!(out, "</{}>", tag);
    out
}

fn upload_form() -> String {
    r#"<form action="/classify" method="post" enctype="multipart/form-data">
<label for="image">Upload a durian leaf image (jpg, jpeg, png)</label>
<input id="image" type="file" name="image" accept=".jpg,.jpeg,.png,image/jpeg,image/png" required>
<button type="submit">Classify Image</button>
</form>"#
        .to_string()
}

fn data_uri(image_bytes: &[u8]) -> String {
    let mime = image::guess_format(image_bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");
    format!("data:{};base64,{}", mime, STANDARD.encode(image_bytes))
}

fn layout(body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ font-family: sans-serif; max-width: 760px; margin: 0 auto; padding: 1rem; }}
header {{ text-align: center; padding: 2rem 0; color: #1b4332; }}
.preview img {{ max-width: 100%; }}
.result {{ background: #d8f3dc; padding: 0.75rem; border-radius: 6px; }}
.notice {{ background: #e7f1fb; padding: 0.75rem; border-radius: 6px; }}
.error {{ background: #fde2e1; padding: 0.75rem; border-radius: 6px; }}
footer {{ text-align: center; color: gray; font-size: 13px; }}
</style>
</head>
<body>
<header>
<h1>{title}</h1>
<p>Upload a photo of a durian leaf to detect its disease and get treatment recommendations.</p>
</header>
<details>
<summary>How to use</summary>
<ol>
<li>Upload the durian leaf image you want to check.</li>
<li>Click <strong>Classify Image</strong> to start the analysis.</li>
<li>Read the diagnosis and the treatment recommendations.</li>
</ol>
</details>
<main>
{body}
</main>
<hr>
<footer>Durian Leaf Disease Detection</footer>
</body>
</html>
"#,
        title = TITLE,
        body = body
    )
}
