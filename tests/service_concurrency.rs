//! Concurrency tests through the async service façade

use autorender::{
    providers::{
        mock::{MockBackgroundRemover, MockGenerativeModel},
        BackgroundRemover,
    },
    AutoRenderService, ErrorKind, ImageArtifact, ProviderKind, ProviderRegistry,
    RemoveBackgroundParams, ServiceConfig, SwapBackgroundParams,
};
use futures::future::join_all;
use image::{Rgb, RgbImage};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

fn photo() -> ImageArtifact {
    ImageArtifact::from_rgb(RgbImage::from_fn(48, 36, |x, y| {
        Rgb([x as u8 * 5, y as u8 * 7, 33])
    }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_swaps_generate_once() {
    let generator = MockGenerativeModel::new().with_delay(Duration::from_millis(150));
    let generate_calls = generator.calls();
    let remover = MockBackgroundRemover::new();
    let remove_calls = remover.calls();
    let service = AutoRenderService::new(
        ProviderRegistry::builder()
            .background_remover(remover)
            .generative_model(generator)
            .build(),
        ServiceConfig::default(),
    )
    .unwrap();

    let requests = (0..6).map(|_| {
        let service = service.clone();
        async move {
            service
                .swap_background(photo(), SwapBackgroundParams::new("neon city at night"))
                .await
        }
    });
    let results: Vec<_> = join_all(requests).await;

    assert_eq!(generate_calls.get(), 1);
    assert_eq!(remove_calls.get(), 1);
    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert_eq!(result.as_ref().unwrap().as_bytes(), first.as_bytes());
    }
    let stats = service.status().swap_cache;
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_requests_all_compute() {
    let remover = MockBackgroundRemover::new().with_delay(Duration::from_millis(20));
    let calls = remover.calls();
    let service = AutoRenderService::new(
        ProviderRegistry::builder().background_remover(remover).build(),
        ServiceConfig::default(),
    )
    .unwrap();

    let requests = (0..4u32).map(|radius| {
        let service = service.clone();
        async move {
            service
                .remove_background(photo(), RemoveBackgroundParams::transparent().with_edge_blur(radius))
                .await
        }
    });
    for result in join_all(requests).await {
        assert_eq!(result.unwrap().dimensions(), (48, 36));
    }
    assert_eq!(calls.get(), 4);
    assert_eq!(service.status().removal_cache.entries, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lazy_provider_loads_once_under_contention() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let service = AutoRenderService::new(
        ProviderRegistry::builder()
            .lazy_background_remover(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                Ok(Box::new(MockBackgroundRemover::new()) as Box<dyn BackgroundRemover>)
            })
            .build(),
        ServiceConfig::builder().disable_cache(true).build().unwrap(),
    )
    .unwrap();

    let requests = (0..5).map(|_| {
        let service = service.clone();
        async move {
            service
                .remove_background(photo(), RemoveBackgroundParams::transparent())
                .await
        }
    });
    for result in join_all(requests).await {
        result.unwrap();
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert!(service.status().providers.is_loaded(ProviderKind::BackgroundRemover));
}

#[tokio::test]
async fn test_failed_lazy_load_is_unavailable() {
    let service = AutoRenderService::new(
        ProviderRegistry::builder()
            .lazy_generative_model(|| {
                Err(autorender::AutoRenderError::internal("weights missing"))
            })
            .background_remover(MockBackgroundRemover::new())
            .build(),
        ServiceConfig::default(),
    )
    .unwrap();

    let err = service
        .swap_background(photo(), SwapBackgroundParams::new("snow"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    assert!(err.kind().is_retryable());

    let status = service.warm_up().await.unwrap();
    assert!(!status.all_configured_loaded());
    assert!(status.is_loaded(ProviderKind::BackgroundRemover));
}
