//! End-to-end pipeline pieces that run without Postgres: validation, variant
//! production, and storage writes composed the way ingest and the process
//! worker compose them.

use std::io::Cursor;

use image::{Rgba, RgbaImage};
use tempfile::tempdir;
use uuid::Uuid;

use picshelf_core::models::{ImageFormat, VariantType};
use picshelf_core::{ProcessorConfig, ValidatorConfig};
use picshelf_processing::{UploadValidator, VariantProcessor};
use picshelf_storage::{object_key, LocalStore, ObjectStore, PutOptions, StorageError};

fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([180, 60, 20, 255]));
    let mut buffer = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .to_rgb8()
        .write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Jpeg)
        .unwrap();
    buffer
}

async fn local_store(dir: &tempfile::TempDir) -> LocalStore {
    LocalStore::new(dir.path(), Some("http://localhost:3000/media".to_string()))
        .await
        .unwrap()
}

/// Happy path: a 1920x1080 JPEG passes every gate, is stored under its
/// upload key, and the processor produces all five variants with the
/// expected thumbnail dimensions.
#[tokio::test]
async fn upload_to_variants_happy_path() {
    let dir = tempdir().unwrap();
    let store = local_store(&dir).await;
    let validator = UploadValidator::new(ValidatorConfig::default());
    let processor = VariantProcessor::new(ProcessorConfig::default());

    let data = jpeg_bytes(1920, 1080);
    let validated = validator.validate_bytes(&data, "holiday photo.jpg").unwrap();
    assert_eq!(validated.format, ImageFormat::Jpeg);
    assert_eq!(validated.safe_filename, "holiday_photo.jpg");

    let image_id = Uuid::new_v4();
    let now = chrono::Utc::now();
    let upload_key = object_key(now, image_id, "upload", validated.format.extension());
    store
        .put(
            &upload_key,
            Box::pin(Cursor::new(data.clone())),
            data.len() as u64,
            PutOptions::with_content_type(validated.format.mime_type()),
        )
        .await
        .unwrap();
    assert!(store.exists(&upload_key).await.unwrap());

    // Worker side: read back the pristine bytes, produce variants, store
    // each under its deterministic key.
    let original = store.get_bytes(&upload_key).await.unwrap();
    let result = processor.process(&original, validated.format).unwrap();
    assert_eq!(result.variants.len(), 5);

    let thumb = result.variant(VariantType::Thumbnail).unwrap();
    assert_eq!((thumb.width, thumb.height), (160, 90));

    for variant in &result.variants {
        let key = object_key(
            now,
            image_id,
            &variant.variant_type.to_string(),
            variant.format.extension(),
        );
        store
            .put_bytes(
                &key,
                variant.data.to_vec(),
                PutOptions::with_content_type(variant.format.mime_type()),
            )
            .await
            .unwrap();
        assert!(store.exists(&key).await.unwrap());

        let stat = store.stat(&key).await.unwrap();
        assert_eq!(stat.size, variant.data.len() as u64);
    }

    // Original variant matches the source's declared dimensions and MIME.
    let original_variant = result.variant(VariantType::Original).unwrap();
    assert_eq!(
        (original_variant.width, original_variant.height),
        (1920, 1080)
    );
    assert_eq!(original_variant.format, ImageFormat::Jpeg);
}

/// Re-running processing after a partial write converges on the same keys
/// with no duplicates (crash-resume behavior of the process worker).
#[tokio::test]
async fn reprocessing_is_idempotent_by_key() {
    let dir = tempdir().unwrap();
    let store = local_store(&dir).await;
    let processor = VariantProcessor::new(ProcessorConfig::default());

    let data = jpeg_bytes(640, 480);
    let image_id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let result = processor.process(&data, ImageFormat::Jpeg).unwrap();

    // First attempt "crashes" after two variants.
    for variant in result.variants.iter().take(2) {
        let key = object_key(
            now,
            image_id,
            &variant.variant_type.to_string(),
            variant.format.extension(),
        );
        store
            .put_bytes(&key, variant.data.to_vec(), PutOptions::default())
            .await
            .unwrap();
    }

    // Re-delivery: skip existing keys, write the rest.
    let rerun = processor.process(&data, ImageFormat::Jpeg).unwrap();
    for variant in &rerun.variants {
        let key = object_key(
            now,
            image_id,
            &variant.variant_type.to_string(),
            variant.format.extension(),
        );
        if !store.exists(&key).await.unwrap() {
            store
                .put_bytes(&key, variant.data.to_vec(), PutOptions::default())
                .await
                .unwrap();
        }
    }

    for variant in &rerun.variants {
        let key = object_key(
            now,
            image_id,
            &variant.variant_type.to_string(),
            variant.format.extension(),
        );
        assert!(store.exists(&key).await.unwrap());
        let stored = store.get_bytes(&key).await.unwrap();
        assert!(!stored.is_empty());
    }
}

/// Oversize uploads are rejected by the validator before anything is stored.
#[tokio::test]
async fn oversize_upload_rejected_before_storage() {
    let dir = tempdir().unwrap();
    let store = local_store(&dir).await;

    let mut config = ValidatorConfig::default();
    config.max_file_size = 4096;
    let validator = UploadValidator::new(config);

    let data = jpeg_bytes(512, 512);
    assert!(data.len() > 4096);

    let err = validator.validate_bytes(&data, "big.jpg").unwrap_err();
    assert!(matches!(
        err,
        picshelf_processing::ValidationError::FileTooLarge { .. }
    ));

    // Nothing was written.
    let key = object_key(chrono::Utc::now(), Uuid::new_v4(), "upload", "jpg");
    assert!(!store.exists(&key).await.unwrap());
}

/// Two identical uploads land under distinct image ids and distinct keys;
/// neither clobbers the other.
#[tokio::test]
async fn duplicate_content_gets_distinct_keys() {
    let dir = tempdir().unwrap();
    let store = local_store(&dir).await;

    let data = jpeg_bytes(64, 64);
    let now = chrono::Utc::now();

    let key_a = object_key(now, Uuid::new_v4(), "upload", "jpg");
    let key_b = object_key(now, Uuid::new_v4(), "upload", "jpg");
    assert_ne!(key_a, key_b);

    store
        .put_bytes(&key_a, data.clone(), PutOptions::default())
        .await
        .unwrap();
    store
        .put_bytes(&key_b, data.clone(), PutOptions::default())
        .await
        .unwrap();

    assert_eq!(store.get_bytes(&key_a).await.unwrap(), data);
    assert_eq!(store.get_bytes(&key_b).await.unwrap(), data);
}

/// Cleanup semantics: deleting a frozen key list is idempotent and leaves no
/// keys behind.
#[tokio::test]
async fn cleanup_key_list_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = local_store(&dir).await;

    let image_id = Uuid::new_v4();
    let now = chrono::Utc::now();
    let mut keys = vec![object_key(now, image_id, "upload", "jpg")];
    for vt in VariantType::ALL {
        keys.push(object_key(now, image_id, &vt.to_string(), "jpg"));
    }

    for key in &keys {
        store
            .put_bytes(key, b"blob".to_vec(), PutOptions::default())
            .await
            .unwrap();
    }

    for key in &keys {
        store.delete(key).await.unwrap();
    }
    // Second pass over the same frozen list does not error.
    for key in &keys {
        store.delete(key).await.unwrap();
        assert!(!store.exists(key).await.unwrap());
    }
}

/// Size mismatch on put leaves no partial object visible.
#[tokio::test]
async fn declared_size_mismatch_leaves_no_object() {
    let dir = tempdir().unwrap();
    let store = local_store(&dir).await;

    let key = object_key(chrono::Utc::now(), Uuid::new_v4(), "upload", "jpg");
    let result = store
        .put(
            &key,
            Box::pin(Cursor::new(vec![9u8; 9])),
            100,
            PutOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(StorageError::SizeMismatch { .. })));
    assert!(!store.exists(&key).await.unwrap());
}
