use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use async_trait::async_trait;
use image_search::embedding::{EmbeddingModel, EmbeddingWeights, ImageEmbedder};
use image_search::folder::ImageFolder;
use image_search::index::MemoryIndex;
use image_search::server::{AppState, ServeOptions, create_app};
use image_search::{ImageSearchBuilder, ImageSelection};
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use rstest::*;
use serde_json::Value;
use tokio::net::TcpListener;

const DIM: usize = 8;

const IMAGES: [&str; 8] = [
    "Bulbasaur-1.png",
    "Bulbasaur-2.png",
    "Chansey-1.jpg",
    "Chansey-2.jpg",
    "Beedrill-1.png",
    "Pidgey-1.png",
    "Pidgey-2.webp",
    "Eevee-1.png",
];

/// 用内容的哈希生成确定的向量
struct HashModel;

fn hash_vector(data: &[u8]) -> Vec<f32> {
    let hash = blake3::hash(data);
    hash.as_bytes()[..DIM].iter().map(|&b| b as f32 - 127.5).collect()
}

#[async_trait]
impl EmbeddingModel for HashModel {
    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>> {
        Ok(hash_vector(image))
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(hash_vector(text.as_bytes()))
    }
}

struct TestServer {
    base: String,
    dir: TempDir,
    client: reqwest::Client,
}

impl TestServer {
    fn path(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().to_string()
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base, route)
    }

    async fn index_all(&self) -> Result<()> {
        let resp = self.client.get(self.url("/indexImages")).send().await?;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await?;
        assert_eq!(body["message"], "Indexing complete");
        Ok(())
    }

    async fn search(&self, image_path: &str) -> Result<(StatusCode, Value)> {
        let resp =
            self.client.get(self.url("/search")).query(&[("imagePath", image_path)]).send().await?;
        Ok((resp.status(), resp.json().await?))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let body: Value = self.client.get(self.url("/listLocalFiles")).send().await?.json().await?;
        Ok(body["imagePaths"]
            .as_array()
            .map(|paths| paths.iter().filter_map(|p| p.as_str().map(str::to_owned)).collect())
            .unwrap_or_default())
    }
}

#[fixture]
async fn server() -> TestServer {
    let dir = TempDir::new().unwrap();
    for (i, name) in IMAGES.iter().enumerate() {
        dir.child(name).write_binary(format!("image-{i}").as_bytes()).unwrap();
    }

    let folder = ImageFolder::new(dir.path(), "jpg,jpeg,png,webp,gif").unwrap();
    let embedder = ImageEmbedder::new(Arc::new(HashModel), DIM, EmbeddingWeights::default());
    let index = Arc::new(MemoryIndex::new("test", DIM));
    let searcher = ImageSearchBuilder::new(folder, embedder, index)
        .chunk_size(3)
        .open()
        .await
        .unwrap();

    let state = AppState::new(searcher, ImageSelection::default());
    let app = create_app(
        state,
        ServeOptions {
            source_folder: dir.path().to_path_buf(),
            frontend_dist: None,
            body_limit: 1024 * 1024,
        },
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });

    TestServer { base: format!("http://{addr}"), dir, client: reqwest::Client::new() }
}

#[rstest]
#[tokio::test]
async fn test_list_local_files(#[future] server: TestServer) -> Result<()> {
    let server = server.await;
    let paths = server.list().await?;
    assert_eq!(paths.len(), IMAGES.len());

    let mut sorted = paths.clone();
    sorted.sort();
    assert_eq!(paths, sorted);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_search_finds_itself(#[future] server: TestServer) -> Result<()> {
    let server = server.await;
    server.index_all().await?;

    let query = server.path("Chansey-1.jpg");
    let (status, body) = server.search(&query).await?;
    assert_eq!(status, StatusCode::OK);

    let results = body.as_array().cloned().unwrap_or_default();
    assert_eq!(results.len(), 6);
    assert_eq!(results[0]["src"], query.as_str());
    assert_eq!(results[0]["name"], "Chansey");
    assert!((results[0]["score"].as_f64().unwrap_or_default() - 1.0).abs() < 1e-4);

    let scores = results.iter().filter_map(|r| r["score"].as_f64()).collect::<Vec<_>>();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_index_twice(#[future] server: TestServer) -> Result<()> {
    let server = server.await;
    server.index_all().await?;
    server.index_all().await?;

    let (_, body) = server.search(&server.path("Eevee-1.png")).await?;
    let results = body.as_array().cloned().unwrap_or_default();
    let mut ids = results.iter().filter_map(|r| r["id"].as_str()).collect::<Vec<_>>();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), results.len());
    Ok(())
}

#[rstest]
#[case("/etc/passwd")]
#[case("")]
#[case("../../Bulbasaur-1.png")]
#[tokio::test]
async fn test_search_invalid_path(#[future] server: TestServer, #[case] path: &str) -> Result<()> {
    let server = server.await;
    let (status, body) = server.search(path).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().is_some_and(|e| e.contains("Invalid image path")));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_search_outside_folder(#[future] server: TestServer) -> Result<()> {
    let server = server.await;
    let outside = TempDir::new()?;
    outside.child("Mew-1.png").write_binary(b"mew")?;

    let (status, _) = server.search(&outside.path().join("Mew-1.png").to_string_lossy()).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let escaped = format!("{}/../{}", server.dir.path().display(), "Mew-1.png");
    let (status, _) = server.search(&escaped).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_upload_then_search(#[future] server: TestServer) -> Result<()> {
    let server = server.await;
    server.index_all().await?;

    let form = Form::new()
        .part("images", Part::bytes(b"a new image".to_vec()).file_name("Mew-1.png"))
        .part("images", Part::bytes(b"another image".to_vec()).file_name("Abra-1.png"));
    let resp = server
        .client
        .post(server.url("/uploadImages"))
        .query(&[("pageSize", "3")])
        .multipart(form)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await?;

    let uploaded = server.path("Mew-1.png");
    let paths = server.list().await?;
    let position = paths.iter().position(|p| *p == uploaded).unwrap_or(usize::MAX);
    assert_eq!(body["pageOfFirstImage"].as_u64(), Some((position / 3 + 1) as u64));

    let (status, body) = server.search(&uploaded).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["src"], uploaded.as_str());
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_upload_without_files(#[future] server: TestServer) -> Result<()> {
    let server = server.await;
    let form = Form::new().text("note", "nothing here");
    let resp = server.client.post(server.url("/uploadImages")).multipart(form).send().await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await?;
    assert_eq!(body["error"], "No files uploaded");
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_upload_unsupported_type(#[future] server: TestServer) -> Result<()> {
    let server = server.await;
    let form = Form::new().part("images", Part::bytes(b"text".to_vec()).file_name("notes.txt"));
    let resp = server.client.post(server.url("/uploadImages")).multipart(form).send().await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(!server.dir.path().join("notes.txt").exists());
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_upload_mixed_files_writes_nothing(#[future] server: TestServer) -> Result<()> {
    let server = server.await;
    let form = Form::new()
        .part("images", Part::bytes(b"a new image".to_vec()).file_name("Mew-1.png"))
        .part("images", Part::bytes(b"text".to_vec()).file_name("notes.txt"));
    let resp = server.client.post(server.url("/uploadImages")).multipart(form).send().await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await?;
    assert!(body["error"].as_str().is_some_and(|e| e.contains("Unsupported file type")));

    assert!(!server.dir.path().join("Mew-1.png").exists());
    assert_eq!(server.list().await?.len(), IMAGES.len());
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_delete_image(#[future] server: TestServer) -> Result<()> {
    let server = server.await;
    server.index_all().await?;

    let target = server.path("Pidgey-1.png");
    let resp = server
        .client
        .delete(server.url("/deleteImage"))
        .query(&[("imagePath", target.as_str())])
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await?;
    assert_eq!(body["message"], "Image deleted");

    assert!(!Path::new(&target).exists());
    assert!(Path::new(&format!("{target}_deleted")).exists());
    assert!(!server.list().await?.contains(&target));

    let (_, body) = server.search(&server.path("Pidgey-2.webp")).await?;
    let results = body.as_array().cloned().unwrap_or_default();
    assert!(results.iter().all(|r| r["src"] != target.as_str()));

    // 文件已被重命名，再次删除视为无效路径
    let resp = server
        .client
        .delete(server.url("/deleteImage"))
        .query(&[("imagePath", target.as_str())])
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_delete_not_indexed(#[future] server: TestServer) -> Result<()> {
    let server = server.await;
    let target = server.path("Eevee-1.png");
    let resp = server
        .client
        .delete(server.url("/deleteImage"))
        .query(&[("imagePath", target.as_str())])
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(Path::new(&target).exists());
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_static_files_and_docs(#[future] server: TestServer) -> Result<()> {
    let server = server.await;
    let resp = server.client.get(server.url("/data/Bulbasaur-1.png")).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.bytes().await?.as_ref(), b"image-0");

    let resp = server.client.get(server.url("/api-docs/openapi.json")).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let doc: Value = resp.json().await?;
    for route in ["/indexImages", "/search", "/uploadImages", "/deleteImage", "/listLocalFiles"] {
        assert!(doc["paths"].get(route).is_some(), "missing {route}");
    }
    Ok(())
}
