mod http_stub;

use aether::ingest::upload_book;
use http_stub::{HttpStub, StubResponse};

#[tokio::test]
async fn upload_posts_multipart_file_field() -> anyhow::Result<()> {
    let stub = HttpStub::spawn(|req| {
        if req.method != "POST" || req.path() != "/api/ingest" {
            return StubResponse::status(404, "not found");
        }
        let body = req.body_text();
        if !body.contains("name=\"file\"; filename=\"story.txt\"") || !body.contains("Once upon") {
            return StubResponse::status(400, "missing file field");
        }
        StubResponse::json(serde_json::json!({
            "id": "story_txt", "title": "story.txt", "author": "Unknown", "publicationYear": 2024,
            "description": "Vibe Coded by Gemini 3. Sci-Fi", "coverImage": "",
            "scenes": [{ "id": 0, "heading": "Part 1", "text": "Once upon a time." }]
        }))
    });

    let temp = tempfile::TempDir::new()?;
    let path = temp.path().join("story.txt");
    std::fs::write(&path, "Once upon a time.")?;

    let book = upload_book(&reqwest::Client::new(), &stub.base_url, &path).await?;
    assert_eq!(book.id, "story_txt");
    assert_eq!(book.scenes.len(), 1);
    Ok(())
}

#[tokio::test]
async fn unsupported_extension_is_rejected_before_upload() -> anyhow::Result<()> {
    let stub = HttpStub::spawn(|_| StubResponse::status(500, "should not be called"));
    let temp = tempfile::TempDir::new()?;
    let path = temp.path().join("scan.pdf");
    std::fs::write(&path, "%PDF")?;

    let err = upload_book(&reqwest::Client::new(), &stub.base_url, &path)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("unsupported file type"));
    assert!(stub.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn backend_failure_is_returned() -> anyhow::Result<()> {
    let stub = HttpStub::spawn(|_| StubResponse::status(500, r#"{"detail":"boom"}"#));
    let temp = tempfile::TempDir::new()?;
    let path = temp.path().join("notes.md");
    std::fs::write(&path, "# Notes")?;

    let err = upload_book(&reqwest::Client::new(), &stub.base_url, &path)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("500"));
    Ok(())
}
