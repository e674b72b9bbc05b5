mod common;

use axum::http::StatusCode;
use common::*;
use fileset_engine::entities::files;
use fileset_engine::services::file_processor::FileProcessOption;
use sea_orm::TransactionTrait;
use serde_json::json;

fn originals(rows: &[files::Model]) -> Vec<&files::Model> {
    rows.iter().filter(|f| f.origin_id.is_none()).collect()
}

#[tokio::test]
async fn test_create_image_stores_original_and_thumbnail() {
    let env = setup().await;
    let png = png_bytes(400, 300);

    // File part first, commands after it, set id last
    let body = MultipartBody::new()
        .file("undefined|up-1|cat.png", &png)
        .text("jsonData", r#"{"title":"notice"}"#)
        .cmds(json!([{ "workType": "CREATE", "uploadId": "up-1", "order": 3 }]))
        .text("fileSetId", "null");

    let result = run_save(&env, body, FileProcessOption::default())
        .await
        .unwrap();
    let file_set_id = result.file_set_id.expect("a new file set");
    assert_eq!(result.data["title"], "notice");

    let rows = env.files().await;
    assert_eq!(rows.len(), 2);
    let original = rows.iter().find(|f| f.origin_id.is_none()).unwrap();
    let thumbnail = rows.iter().find(|f| f.origin_id.is_some()).unwrap();

    assert_eq!(thumbnail.origin_id, Some(original.id));
    assert_eq!(original.sort_order, Some(3));
    assert_eq!(thumbnail.sort_order, Some(3));
    assert!(original.is_image && thumbnail.is_image);
    assert_eq!(original.save_name, original.id.to_string());
    assert_eq!(thumbnail.save_name, format!("thumb_{}", original.id));
    assert_eq!(original.original_name, "cat");
    assert_eq!(original.extension, ".png");

    let dir = env.set_dir(file_set_id);
    let original_path = dir.join(format!("{}.png", original.id));
    let thumbnail_path = dir.join(format!("thumb_{}.png", original.id));
    assert_eq!(std::fs::read(&original_path).unwrap(), png);

    let thumb = image::open(&thumbnail_path).unwrap();
    assert_eq!((thumb.width(), thumb.height()), (200, 150));

    assert!(env.temp_entries().is_empty(), "staged upload must be gone");
}

#[tokio::test]
async fn test_create_document_has_no_thumbnail() {
    let env = setup().await;
    let file_set_id = seed_file_set(&env, &[("report.pdf", b"%PDF-1.4 test".to_vec())]).await;

    let rows = env.files().await;
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].is_image);
    assert_eq!(list_dir(&env.set_dir(file_set_id)).len(), 1);
}

#[tokio::test]
async fn test_quota_rejects_before_any_mutation() {
    let env = setup().await;
    let file_set_id = seed_file_set(
        &env,
        &[("a.pdf", b"a".to_vec()), ("b.png", png_bytes(20, 20))],
    )
    .await;
    let rows_before = env.files().await;
    let files_before = list_dir(&env.set_dir(file_set_id));

    let body = MultipartBody::new()
        .text("fileSetId", &file_set_id.to_string())
        .cmds(json!([{ "workType": "CREATE", "uploadId": "up-3", "order": 2 }]))
        .file("undefined|up-3|c.pdf", b"c");

    let err = run_save(&env, body, FileProcessOption::with_max_file_count(2))
        .await
        .unwrap_err();
    let controlled = err.as_controlled().expect("quota is a controlled error");
    assert_eq!(controlled.status, StatusCode::BAD_REQUEST);

    assert_eq!(env.files().await, rows_before);
    let mut files_after = list_dir(&env.set_dir(file_set_id));
    let mut files_before = files_before;
    files_after.sort();
    files_before.sort();
    assert_eq!(files_after, files_before);
}

#[tokio::test]
async fn test_thumbnails_do_not_count_against_quota() {
    let env = setup().await;
    let body = MultipartBody::new()
        .cmds(json!([
            { "workType": "CREATE", "uploadId": "a", "order": 0 },
            { "workType": "CREATE", "uploadId": "b", "order": 1 }
        ]))
        .file("undefined|a|a.png", &png_bytes(10, 10))
        .file("undefined|b|b.jpg", &png_bytes(10, 10));

    // Two images produce four rows but only two count
    let result = run_save(&env, body, FileProcessOption::with_max_file_count(2)).await;
    assert!(result.is_ok());
    assert_eq!(env.files().await.len(), 4);
}

#[tokio::test]
async fn test_deletes_that_remove_nothing_do_not_free_quota() {
    let env = setup().await;
    let full = seed_file_set(&env, &[("a.pdf", b"a".to_vec()), ("b.pdf", b"b".to_vec())]).await;
    let other = seed_file_set(&env, &[("x.pdf", b"x".to_vec())]).await;
    let foreign = env
        .files()
        .await
        .into_iter()
        .find(|f| f.file_set_id == other)
        .unwrap();
    let rows_before = env.files().await;

    // Unknown id, another set's row and a repeat of it all free nothing
    let body = MultipartBody::new()
        .text("fileSetId", &full.to_string())
        .cmds(json!([
            { "workType": "DELETE", "id": 999999, "order": 0 },
            { "workType": "DELETE", "id": foreign.id, "order": 0 },
            { "workType": "DELETE", "id": foreign.id, "order": 0 },
            { "workType": "CREATE", "uploadId": "c", "order": 2 }
        ]))
        .file("undefined|c|c.pdf", b"c");

    let err = run_save(&env, body, FileProcessOption::with_max_file_count(2))
        .await
        .unwrap_err();
    assert!(err.as_controlled().is_some());
    assert_eq!(env.files().await, rows_before);
    assert_eq!(list_dir(&env.set_dir(full)).len(), 2);
    assert!(env.set_dir(other).join(foreign.stored_name()).exists());
}

#[tokio::test]
async fn test_thumbnail_and_origin_delete_free_one_slot() {
    let env = setup().await;
    let file_set_id = seed_file_set(
        &env,
        &[("a.pdf", b"a".to_vec()), ("photo.png", png_bytes(20, 20))],
    )
    .await;
    let rows = env.files().await;
    let thumbnail = rows.iter().find(|f| f.origin_id.is_some()).unwrap().clone();
    let photo_id = thumbnail.origin_id.unwrap();

    let body = MultipartBody::new()
        .text("fileSetId", &file_set_id.to_string())
        .cmds(json!([
            { "workType": "DELETE", "id": thumbnail.id, "originId": photo_id, "order": 0 },
            { "workType": "DELETE", "id": photo_id, "order": 0 },
            { "workType": "CREATE", "uploadId": "c", "order": 1 },
            { "workType": "CREATE", "uploadId": "d", "order": 2 }
        ]))
        .file("undefined|c|c.pdf", b"c")
        .file("undefined|d|d.pdf", b"d");

    // 2 originals - 1 deleted + 2 created = 3
    let err = run_save(&env, body, FileProcessOption::with_max_file_count(2))
        .await
        .unwrap_err();
    assert!(err.as_controlled().is_some());
    assert_eq!(env.files().await, rows);
}

#[tokio::test]
async fn test_delete_then_reset_restores_file() {
    let env = setup().await;
    let pdf = b"%PDF-1.4 keep me".to_vec();
    let file_set_id = seed_file_set(
        &env,
        &[("keep.pdf", pdf.clone()), ("photo.png", png_bytes(30, 30))],
    )
    .await;
    let rows = env.files().await;
    let doc = rows.iter().find(|f| f.extension == ".pdf").unwrap().clone();
    let photo = rows
        .iter()
        .find(|f| f.extension == ".png" && f.origin_id.is_none())
        .unwrap()
        .clone();
    let dir = env.set_dir(file_set_id);

    let body = MultipartBody::new()
        .text("fileSetId", &file_set_id.to_string())
        .cmds(json!([
            { "workType": "DELETE", "id": doc.id, "order": 0 },
            { "workType": "DELETE", "id": photo.id, "order": 1 }
        ]));
    let mut multipart = body.into_multipart().await;
    let mut processor = env.store.processor(FileProcessOption::default());
    let txn = env.db.begin().await.unwrap();

    let result = processor.save(&txn, &mut multipart).await.unwrap();
    assert_eq!(result.file_set_id, None);
    assert!(!dir.exists());
    assert_eq!(processor.paths().deleted.len(), 3);

    // The surrounding work fails after save
    processor.reset().await.unwrap();
    txn.rollback().await.unwrap();

    assert_eq!(std::fs::read(dir.join(doc.stored_name())).unwrap(), pdf);
    assert!(dir.join(photo.stored_name()).exists());
    assert!(dir.join(format!("thumb_{}", photo.stored_name())).exists());
    assert!(env.temp_entries().is_empty(), "no backup may be left behind");
    assert_eq!(env.files().await.len(), 3);
    assert_eq!(env.file_sets().await.len(), 1);
}

#[tokio::test]
async fn test_create_then_reset_keeps_existing_set() {
    let env = setup().await;
    let pdf = b"%PDF-1.4 old".to_vec();
    let file_set_id = seed_file_set(&env, &[("old.pdf", pdf.clone())]).await;
    let old = env.files().await.remove(0);
    let dir = env.set_dir(file_set_id);

    let body = MultipartBody::new()
        .text("fileSetId", &file_set_id.to_string())
        .cmds(json!([{ "workType": "CREATE", "uploadId": "new", "order": 1 }]))
        .file("undefined|new|new.png", &png_bytes(40, 40));
    let mut multipart = body.into_multipart().await;
    let mut processor = env.store.processor(FileProcessOption::default());
    let txn = env.db.begin().await.unwrap();

    let result = processor.save(&txn, &mut multipart).await.unwrap();
    assert_eq!(result.file_set_id, Some(file_set_id));
    let saved = processor.paths().saved;
    assert_eq!(saved.len(), 2);
    assert!(saved.iter().all(|path| path.exists()));

    processor.reset().await.unwrap();
    txn.rollback().await.unwrap();

    assert!(saved.iter().all(|path| !path.exists()));
    assert!(dir.exists());
    assert_eq!(list_dir(&dir), vec![dir.join(old.stored_name())]);
    assert_eq!(std::fs::read(dir.join(old.stored_name())).unwrap(), pdf);
    assert_eq!(env.files().await, vec![old]);
    assert_eq!(env.file_sets().await.len(), 1);
}

#[tokio::test]
async fn test_deleting_last_file_removes_file_set() {
    let env = setup().await;
    let file_set_id = seed_file_set(&env, &[("only.png", png_bytes(16, 16))]).await;
    let rows = env.files().await;
    let original = originals(&rows)[0].clone();
    let thumbnail = rows.iter().find(|f| f.origin_id.is_some()).unwrap().clone();

    // Client names both rows, as it does for images
    let body = MultipartBody::new()
        .text("fileSetId", &file_set_id.to_string())
        .cmds(json!([
            { "workType": "DELETE", "id": thumbnail.id, "originId": original.id, "order": 0 }
        ]));
    let result = run_save(&env, body, FileProcessOption::default())
        .await
        .unwrap();

    assert_eq!(result.file_set_id, None);
    assert!(env.files().await.is_empty());
    assert!(env.file_sets().await.is_empty());
    assert!(!env.set_dir(file_set_id).exists());
    assert!(env.temp_entries().is_empty());
}

#[tokio::test]
async fn test_delete_and_create_in_one_operation() {
    let env = setup().await;
    let file_set_id = seed_file_set(&env, &[("old.pdf", b"old".to_vec())]).await;
    let old = env.files().await.remove(0);

    let body = MultipartBody::new()
        .text("fileSetId", &file_set_id.to_string())
        .file("undefined|new|new.pdf", b"new")
        .cmds(json!([
            { "workType": "DELETE", "id": old.id, "order": 0 },
            { "workType": "CREATE", "uploadId": "new", "order": 0 }
        ]));
    let result = run_save(&env, body, FileProcessOption::with_max_file_count(1))
        .await
        .unwrap();

    assert_eq!(result.file_set_id, Some(file_set_id));
    let rows = env.files().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].original_name, "new");
    let on_disk = list_dir(&env.set_dir(file_set_id));
    assert_eq!(on_disk, vec![env.set_dir(file_set_id).join(rows[0].stored_name())]);
}

#[tokio::test]
async fn test_edit_reorders_original_and_thumbnail() {
    let env = setup().await;
    let file_set_id = seed_file_set(&env, &[("a.jpg", png_bytes(12, 12))]).await;
    let original = originals(&env.files().await)[0].clone();

    let body = MultipartBody::new()
        .text("fileSetId", &file_set_id.to_string())
        .cmds(json!([{ "workType": "EDIT", "id": original.id, "order": 9 }]));
    run_save(&env, body, FileProcessOption::default())
        .await
        .unwrap();

    let rows = env.files().await;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|f| f.sort_order == Some(9)));
}

#[tokio::test]
async fn test_commands_against_other_sets_are_ignored() {
    let env = setup().await;
    let first = seed_file_set(&env, &[("a.pdf", b"a".to_vec())]).await;
    let second = seed_file_set(&env, &[("b.pdf", b"b".to_vec())]).await;
    let foreign = env
        .files()
        .await
        .into_iter()
        .find(|f| f.file_set_id == second)
        .unwrap();

    let body = MultipartBody::new()
        .text("fileSetId", &first.to_string())
        .cmds(json!([
            { "workType": "DELETE", "id": foreign.id, "order": 0 },
            { "workType": "EDIT", "id": foreign.id, "order": 5 }
        ]));
    let result = run_save(&env, body, FileProcessOption::default())
        .await
        .unwrap();

    assert_eq!(result.file_set_id, Some(first));
    let rows = env.files().await;
    assert_eq!(rows.len(), 2);
    let untouched = rows.iter().find(|f| f.id == foreign.id).unwrap();
    assert_eq!(untouched.sort_order, foreign.sort_order);
    assert!(env.set_dir(second).join(foreign.stored_name()).exists());
}

#[tokio::test]
async fn test_destroy_removes_every_file() {
    let env = setup().await;
    let file_set_id = seed_file_set(
        &env,
        &[
            ("a.png", png_bytes(10, 10)),
            ("b.jpeg", png_bytes(10, 10)),
            ("c.pdf", b"c".to_vec()),
        ],
    )
    .await;
    assert_eq!(env.files().await.len(), 5);

    let mut processor = env.store.processor(FileProcessOption::default());
    let txn = env.db.begin().await.unwrap();
    processor.destroy(&txn, Some(file_set_id)).await.unwrap();
    txn.commit().await.unwrap();
    processor.finish().await.unwrap();

    assert!(env.files().await.is_empty());
    assert!(env.file_sets().await.is_empty());
    assert!(!env.set_dir(file_set_id).exists());
    assert!(env.temp_entries().is_empty());
}

#[tokio::test]
async fn test_destroy_then_reset_restores_directory() {
    let env = setup().await;
    let file_set_id = seed_file_set(&env, &[("a.png", png_bytes(10, 10))]).await;
    let before = {
        let mut entries = list_dir(&env.set_dir(file_set_id));
        entries.sort();
        entries
    };

    let mut processor = env.store.processor(FileProcessOption::default());
    let txn = env.db.begin().await.unwrap();
    processor.destroy(&txn, Some(file_set_id)).await.unwrap();
    processor.reset().await.unwrap();
    txn.rollback().await.unwrap();

    let mut after = list_dir(&env.set_dir(file_set_id));
    after.sort();
    assert_eq!(after, before);
    assert_eq!(env.files().await.len(), 2);
    assert!(env.temp_entries().is_empty());
}

#[tokio::test]
async fn test_destroy_missing_is_noop() {
    let env = setup().await;
    let file_set_id = seed_file_set(&env, &[("a.pdf", b"a".to_vec())]).await;

    for target in [None, Some(file_set_id + 100)] {
        let mut processor = env.store.processor(FileProcessOption::default());
        let txn = env.db.begin().await.unwrap();
        processor.destroy(&txn, target).await.unwrap();
        assert_eq!(processor.paths(), Default::default());
        txn.commit().await.unwrap();
        processor.finish().await.unwrap();
    }

    assert_eq!(env.files().await.len(), 1);
    assert_eq!(env.file_sets().await.len(), 1);
}

#[tokio::test]
async fn test_concurrent_saves_on_one_set_serialize() {
    let env = setup().await;
    let file_set_id = seed_file_set(&env, &[("first.pdf", b"1".to_vec())]).await;

    let mut handles = Vec::new();
    for i in 0..2 {
        let store = env.store.clone();
        let db = env.db.clone();
        handles.push(tokio::spawn(async move {
            let upload_id = format!("race-{i}");
            let body = MultipartBody::new()
                .text("fileSetId", &file_set_id.to_string())
                .file(&format!("undefined|{upload_id}|r{i}.pdf"), b"r")
                .cmds(json!([{ "workType": "CREATE", "uploadId": upload_id, "order": i }]));
            run_save_on(&store, &db, body, FileProcessOption::with_max_file_count(2)).await
        }));
    }

    let mut succeeded = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => {
                assert!(e.as_controlled().is_some(), "unexpected error: {e}");
                rejected += 1;
            }
        }
    }

    assert_eq!((succeeded, rejected), (1, 1));
    assert_eq!(env.files().await.len(), 2);
    assert_eq!(list_dir(&env.set_dir(file_set_id)).len(), 2);
}

#[tokio::test]
async fn test_create_without_staged_upload_fails_cleanly() {
    let env = setup().await;
    let body = MultipartBody::new()
        .cmds(json!([{ "workType": "CREATE", "uploadId": "ghost", "order": 0 }]));

    let err = run_save(&env, body, FileProcessOption::default())
        .await
        .unwrap_err();

    assert!(err.as_controlled().is_some());
    assert!(env.file_sets().await.is_empty());
    assert!(list_dir(env.data_root()).is_empty());
}

#[tokio::test]
async fn test_blocked_extension_keeps_earlier_parts_staged() {
    let env = setup().await;
    let body = MultipartBody::new()
        .file("undefined|ok|fine.pdf", b"fine")
        .file("undefined|bad|setup.EXE", b"MZ")
        .file("undefined|never|later.pdf", b"later");
    let mut multipart = body.into_multipart().await;
    let processor = env.store.processor(FileProcessOption::default());

    let err = processor.stage(&mut multipart).await.unwrap_err();
    let controlled = err.as_controlled().unwrap();
    assert!(controlled.message.contains("setup.EXE"));

    let paths = processor.paths();
    assert_eq!(paths.temp.len(), 1);
    assert_eq!(env.temp_entries(), paths.temp);

    processor.finish().await.unwrap();
    assert!(env.temp_entries().is_empty());
}

#[tokio::test]
async fn test_missing_extension_and_long_names_are_rejected() {
    let env = setup().await;

    for encoded in [
        "undefined|a|README".to_string(),
        format!("undefined|b|{}.pdf", "x".repeat(260)),
    ] {
        let mut multipart = MultipartBody::new()
            .file(&encoded, b"data")
            .into_multipart()
            .await;
        let processor = env.store.processor(FileProcessOption::default());
        let err = processor.stage(&mut multipart).await.unwrap_err();
        assert_eq!(err.as_controlled().unwrap().status, StatusCode::BAD_REQUEST);
        assert!(env.temp_entries().is_empty());
    }
}

#[tokio::test]
async fn test_oversized_upload_is_aborted() {
    let env = setup_with(|config| config.max_upload_size = 1024).await;
    let mut multipart = MultipartBody::new()
        .file("undefined|big|big.pdf", &vec![7u8; 4096])
        .into_multipart()
        .await;
    let processor = env.store.processor(FileProcessOption::default());

    let err = processor.stage(&mut multipart).await.unwrap_err();
    assert_eq!(
        err.as_controlled().unwrap().status,
        StatusCode::PAYLOAD_TOO_LARGE
    );
    assert!(env.temp_entries().is_empty(), "partial upload must be removed");
    assert!(processor.paths().temp.is_empty());
}

#[tokio::test]
async fn test_first_field_occurrence_wins() {
    let env = setup().await;
    let mut multipart = MultipartBody::new()
        .text("fileSetId", "4")
        .text("fileSetId", "5")
        .text("jsonData", r#"{"v":1}"#)
        .text("jsonData", r#"{"v":2}"#)
        .text("unknown", "ignored")
        .into_multipart()
        .await;
    let processor = env.store.processor(FileProcessOption::default());

    let staged = processor.stage(&mut multipart).await.unwrap();
    assert_eq!(staged.file_set_id, Some(4));
    assert_eq!(staged.json_data, Some(json!({"v": 1})));
    assert!(staged.process_cmds.is_none());
}

#[tokio::test]
async fn test_corrupt_image_fails_and_reset_cleans_up() {
    let env = setup().await;
    let body = MultipartBody::new()
        .cmds(json!([{ "workType": "CREATE", "uploadId": "x", "order": 0 }]))
        .file("undefined|x|broken.png", b"not really a png");

    let err = run_save(&env, body, FileProcessOption::default())
        .await
        .unwrap_err();
    assert!(err.as_controlled().is_some());
    assert!(env.file_sets().await.is_empty());
    assert!(list_dir(env.data_root()).is_empty());
}
