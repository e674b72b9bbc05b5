#![allow(dead_code)]

use axum::body::Body;
use axum::extract::{FromRequest, Multipart};
use axum::http::{Request, header};
use fileset_engine::api::error::AppError;
use fileset_engine::config::StorageConfig;
use fileset_engine::entities::{file_sets, files, prelude::*};
use fileset_engine::infrastructure::{database, storage};
use fileset_engine::services::file_processor::{
    FileProcessOption, FileProcessResult, FileStore,
};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use sea_orm::{Database, DatabaseConnection, EntityTrait, TransactionTrait};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const BOUNDARY: &str = "----fileset-engine-test-boundary";

pub struct TestEnv {
    pub dir: TempDir,
    pub db: DatabaseConnection,
    pub store: FileStore,
    pub config: StorageConfig,
}

impl TestEnv {
    pub fn data_root(&self) -> &Path {
        &self.config.test_file_base_default
    }

    pub fn temp_root(&self) -> &Path {
        &self.config.test_temp_file_path
    }

    pub fn set_dir(&self, file_set_id: i32) -> PathBuf {
        self.data_root().join(file_set_id.to_string())
    }

    pub async fn files(&self) -> Vec<files::Model> {
        Files::find().all(&self.db).await.unwrap()
    }

    pub async fn file_sets(&self) -> Vec<file_sets::Model> {
        FileSets::find().all(&self.db).await.unwrap()
    }

    pub fn temp_entries(&self) -> Vec<PathBuf> {
        list_dir(self.temp_root())
    }
}

pub fn list_dir(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

pub async fn setup() -> TestEnv {
    setup_with(|_| {}).await
}

pub async fn setup_with(adjust: impl FnOnce(&mut StorageConfig)) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StorageConfig::rooted_at(dir.path());
    adjust(&mut config);

    let db = Database::connect("sqlite::memory:").await.unwrap();
    database::run_migrations(&db).await.unwrap();

    let roots = storage::setup_storage(&config).await.unwrap();
    let store = FileStore::from_config(roots, &config);

    TestEnv {
        dir,
        db,
        store,
        config,
    }
}

/// Hand-built `multipart/form-data` body.
#[derive(Default)]
pub struct MultipartBody {
    bytes: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.bytes.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, encoded_name: &str, data: &[u8]) -> Self {
        self.bytes.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{encoded_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        self.bytes.extend_from_slice(data);
        self.bytes.extend_from_slice(b"\r\n");
        self
    }

    pub fn cmds(self, cmds: serde_json::Value) -> Self {
        self.text("processCmds", &cmds.to_string())
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.bytes
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.bytes
    }

    pub fn into_request(self, uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(self.finish()))
            .unwrap()
    }

    pub async fn into_multipart(self) -> Multipart {
        Multipart::from_request(self.into_request("/file-sets"), &())
            .await
            .unwrap()
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)
        .unwrap();
    out
}

/// The caller side of the protocol: save, then commit + finish or reset + rollback.
pub async fn run_save(
    env: &TestEnv,
    body: MultipartBody,
    option: FileProcessOption,
) -> Result<FileProcessResult, AppError> {
    run_save_on(&env.store, &env.db, body, option).await
}

pub async fn run_save_on(
    store: &FileStore,
    db: &DatabaseConnection,
    body: MultipartBody,
    option: FileProcessOption,
) -> Result<FileProcessResult, AppError> {
    let mut multipart = body.into_multipart().await;
    let mut processor = store.processor(option);
    let txn = db.begin().await.unwrap();

    match processor.save(&txn, &mut multipart).await {
        Ok(result) => {
            txn.commit().await.unwrap();
            processor.finish().await.unwrap();
            Ok(result)
        }
        Err(e) => {
            processor.reset().await.unwrap();
            txn.rollback().await.unwrap();
            Err(e)
        }
    }
}

/// Creates a file set holding the given `(name.ext, bytes)` uploads.
pub async fn seed_file_set(env: &TestEnv, uploads: &[(&str, Vec<u8>)]) -> i32 {
    let mut body = MultipartBody::new();
    let mut cmds = Vec::new();
    for (i, (name, data)) in uploads.iter().enumerate() {
        let upload_id = format!("seed-{i}");
        body = body.file(&format!("undefined|{upload_id}|{name}"), data);
        cmds.push(serde_json::json!({
            "workType": "CREATE",
            "uploadId": upload_id,
            "order": i,
        }));
    }
    let body = body.cmds(serde_json::Value::Array(cmds));

    run_save(env, body, FileProcessOption::default())
        .await
        .unwrap()
        .file_set_id
        .unwrap()
}
