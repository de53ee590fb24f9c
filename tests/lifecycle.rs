//! End-to-end lifecycle through the public API with the real synthesizer:
//! ingest assets, generate, finalize, serve, reconfigure, serve again.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use storefront_images::cache::CacheMode;
use storefront_images::config::ServiceConfig;
use storefront_images::imaging::ShapeSynthesizer;
use storefront_images::provider::{ImageProvider, ProductSource, StaticProducts, StoreImageProvider};
use storefront_images::setup::{ReconfigurationReport, SetupController};
use storefront_images::storage::{StorageMode, WorkingDir};
use storefront_images::types::{SizeVariant, SubjectKey};
use tempfile::TempDir;

const WAIT: Option<Duration> = Some(Duration::from_secs(30));

fn write_png(dir: &Path, label: &str) {
    std::fs::create_dir_all(dir).unwrap();
    let img = image::RgbImage::from_pixel(16, 16, image::Rgb([0, 90, 160]));
    img.save_with_format(dir.join(format!("{label}.png")), image::ImageFormat::Png)
        .unwrap();
}

struct Store {
    _tmp: TempDir,
    assets: std::path::PathBuf,
    products: Arc<StaticProducts>,
    provider: Arc<StoreImageProvider>,
    controller: SetupController,
}

fn store(mode: StorageMode, cache: CacheMode, products: Vec<u64>) -> Store {
    let tmp = TempDir::new().unwrap();
    let mut config = ServiceConfig::default();
    config.working_dir = tmp.path().join("images").to_string_lossy().into_owned();
    config.storage.mode = mode;
    config.cache.mode = cache;
    config.cache.size = 2;
    config.generation.variant = SizeVariant::Full;
    config.generation.shapes_per_image = 4;

    let products = Arc::new(StaticProducts::new(products));
    let provider = Arc::new(StoreImageProvider::new());
    let controller = SetupController::from_config(
        &config,
        Arc::clone(&products) as Arc<dyn ProductSource>,
        Arc::clone(&provider) as Arc<dyn ImageProvider>,
        Arc::new(ShapeSynthesizer::new()),
    )
    .unwrap();

    Store {
        assets: tmp.path().join("assets"),
        _tmp: tmp,
        products,
        provider,
        controller,
    }
}

fn stored_ids(s: &Store) -> Vec<u64> {
    WorkingDir::at(s.controller.working_dir()).list_ids().unwrap()
}

fn product(id: u64) -> SubjectKey {
    SubjectKey::Product(id)
}

#[test]
fn reconfiguration_preserves_issued_identifiers() {
    let mut s = store(StorageMode::Drive, CacheMode::Lru, vec![1, 2]);
    write_png(&s.assets, "icon");
    assert_eq!(s.controller.detect_pre_existing_images(&s.assets.clone()).unwrap(), 1);

    assert!(s.controller.generate_images_from_source(None).unwrap());
    s.controller.finalize_setup().unwrap();
    assert!(s.controller.wait_for_generation(WAIT));

    let index = s.controller.index();
    let p1 = index.image_id(&product(1), SizeVariant::Full).unwrap();
    let p2 = index.image_id(&product(2), SizeVariant::Full).unwrap();
    let icon = index.image_id(&SubjectKey::from("icon"), SizeVariant::Full).unwrap();
    let p1_bytes = s.provider.image(&product(1), SizeVariant::Full).unwrap().bytes.clone();

    s.products.replace(Some(vec![1, 3]));
    let report = s.controller.reconfiguration().unwrap().unwrap();
    assert!(s.controller.wait_for_generation(WAIT));

    assert_eq!(
        report,
        ReconfigurationReport {
            kept: 1,
            new: 1,
            deleted: 1,
            web_retained: 1
        }
    );

    // p1 kept with its id and pixels, p2 gone with its file, p3 fresh.
    assert_eq!(index.image_id(&product(1), SizeVariant::Full), Some(p1));
    assert_eq!(s.provider.image(&product(1), SizeVariant::Full).unwrap().bytes, p1_bytes);
    assert!(!index.has_image(&product(2), SizeVariant::Full));
    let p3 = index.image_id(&product(3), SizeVariant::Full).unwrap();
    assert!(p3 > icon && p3 > p2);

    let stored = stored_ids(&s);
    assert!(!stored.contains(&p2));
    assert!(stored.contains(&p1));
    assert!(stored.contains(&p3));
    assert!(stored.contains(&icon));

    let served = s.provider.image(&product(3), SizeVariant::Full).unwrap();
    let decoded = image::load_from_memory(&served.bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (500, 500));
}

#[test]
fn limited_storage_never_exceeds_its_ceiling() {
    let mut s = store(StorageMode::DriveLimited, CacheMode::None, vec![]);
    write_png(&s.assets, "logo");
    s.controller.detect_pre_existing_images(&s.assets.clone()).unwrap();

    // Ceiling is 2 generated + 1 pre-existing. Finalizing while the worker
    // runs, as the binary does.
    assert!(s.controller.generate_images(vec![10, 11], 2).unwrap());
    s.controller.finalize_setup().unwrap();
    assert!(s.controller.wait_for_generation(WAIT));
    assert_eq!(s.controller.storage_ceiling(), 3);
    assert_eq!(stored_ids(&s).len(), 3);

    // The next run writes through the same limited stack.
    assert!(s.controller.generate_images(vec![12], 1).unwrap());
    assert!(s.controller.wait_for_generation(WAIT));
    assert!(stored_ids(&s).len() <= 3);

    // The earliest admission (the logo) made room for product 12.
    let logo = s.controller.index().image_id(&SubjectKey::from("logo"), SizeVariant::Full).unwrap();
    assert!(!stored_ids(&s).contains(&logo));
    assert!(s.provider.image(&product(12), SizeVariant::Full).is_ok());
}

#[test]
fn delete_all_created_data_clears_working_directory() {
    let mut s = store(StorageMode::Drive, CacheMode::Fifo, vec![1]);
    assert!(s.controller.generate_images_from_source(None).unwrap());
    assert!(s.controller.wait_for_generation(WAIT));
    assert_eq!(stored_ids(&s).len(), 1);

    s.controller.delete_all_created_data().unwrap();
    assert!(!s.controller.working_dir().exists());
}
