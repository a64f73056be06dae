//! Session lifecycle behavior: serialization of concurrent transforms,
//! release semantics, pre-grown regions, and binding resolution.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use descrambler::buffer::BufferWindow;
use descrambler::buffer::BufferWindowMut;
use descrambler::cas::DescrambleOutcome;
use descrambler::cas::Descrambler;
use descrambler::cas::DescramblerBinding;
use descrambler::cas::DestinationBuffer;
use descrambler::cas::ScramblingControl;
use descrambler::cas::SharedBuffer;
use descrambler::cas::TransportError;
use descrambler::error::Error;
use descrambler::session::DescrambleSession;
use descrambler::shmem::GROWTH_QUANTUM;
use descrambler::subsample::Subsample;
use descrambler::subsample::SubsampleInfo;
use descrambler::testing::service::EchoDescrambler;
use rand::rngs::StdRng;
use rand::RngCore;
use rand::SeedableRng;
use tokio::sync::Notify;

/// A service that parks in the middle of a call until the test opens the
/// gate.
struct GatedDescrambler {
    entered: Arc<AtomicBool>,
    gate: Arc<Notify>,
}

impl Descrambler for GatedDescrambler {
    async fn descramble<'a>(
        &'a self,
        _control: ScramblingControl,
        subsamples: &'a [Subsample],
        _src: &'a SharedBuffer,
        _src_offset: u64,
        _dst: &'a DestinationBuffer,
        _dst_offset: u64,
    ) -> Result<DescrambleOutcome, TransportError> {
        self.entered.store(true, Ordering::SeqCst);
        self.gate.notified().await;
        let total: u64 = subsamples
            .iter()
            .map(|subsample| u64::from(subsample.clear_bytes) + u64::from(subsample.encrypted_bytes))
            .sum();
        Ok(DescrambleOutcome::success(total as u32))
    }
}

/// A binding that always resolves to a live echo service.
struct LiveBinding;

impl DescramblerBinding for LiveBinding {
    type Service = EchoDescrambler;

    fn resolve(&self) -> Option<Self::Service> {
        Some(EchoDescrambler::new())
    }
}

/// A binding whose capability has gone away.
struct StaleBinding;

impl DescramblerBinding for StaleBinding {
    type Service = EchoDescrambler;

    fn resolve(&self) -> Option<Self::Service> {
        None
    }
}

/// Many tasks hammering one session: every transform round-trips and the
/// service never observes two calls in flight at once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transforms_are_serialized() {
    let service = Arc::new(EchoDescrambler::new());
    let session = Arc::new(DescrambleSession::new(Arc::clone(&service)));

    let mut tasks = Vec::new();
    for seed in 0..8u64 {
        let session = Arc::clone(&session);
        tasks.push(tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(seed);
            let len = 512 + seed as usize;
            let mut src_storage = vec![0u8; len];
            rng.fill_bytes(&mut src_storage);
            let mut dst_storage = vec![0u8; len];
            let src = BufferWindow::full(&src_storage);
            let mut dst = BufferWindowMut::full(&mut dst_storage);
            let info = SubsampleInfo {
                count: 1,
                clear: Some(&[len as i32]),
                encrypted: None,
            };

            let written = session
                .descramble(ScramblingControl::EvenKey, info, &src, &mut dst)
                .await
                .unwrap();

            assert_eq!(written as usize, len);
            assert_eq!(dst_storage, src_storage);
        }));
    }

    for result in futures::future::join_all(tasks).await {
        result.unwrap();
    }

    assert_eq!(service.calls(), 8);
    assert!(!service.saw_overlapping_calls());
}

/// Release takes the session lock, so it cannot complete while a
/// transform is parked inside the service call.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn release_waits_for_the_in_flight_transform() {
    let entered = Arc::new(AtomicBool::new(false));
    let gate = Arc::new(Notify::new());
    let session = Arc::new(DescrambleSession::new(GatedDescrambler {
        entered: Arc::clone(&entered),
        gate: Arc::clone(&gate),
    }));

    let transform = tokio::spawn({
        let session = Arc::clone(&session);
        async move {
            let src_storage: Vec<u8> = (0..8).collect();
            let mut dst_storage = vec![0u8; 8];
            let src = BufferWindow::full(&src_storage);
            let mut dst = BufferWindowMut::full(&mut dst_storage);
            let info = SubsampleInfo { count: 1, clear: Some(&[8]), encrypted: None };

            let written = session
                .descramble(ScramblingControl::EvenKey, info, &src, &mut dst)
                .await
                .unwrap();

            assert_eq!(written, 8);
            assert_eq!(dst_storage, src_storage);
        }
    });

    while !entered.load(Ordering::SeqCst) {
        tokio::task::yield_now().await;
    }

    let releaser = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.release().await }
    });

    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
    assert!(!releaser.is_finished());

    gate.notify_one();
    transform.await.unwrap();
    releaser.await.unwrap();

    assert_eq!(session.transport_capacity().await, 0);

    let src_storage = vec![0u8; 4];
    let mut dst_storage = vec![0u8; 4];
    let src = BufferWindow::full(&src_storage);
    let mut dst = BufferWindowMut::full(&mut dst_storage);
    let info = SubsampleInfo { count: 1, clear: Some(&[4]), encrypted: None };
    let err = session
        .descramble(ScramblingControl::EvenKey, info, &src, &mut dst)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionReleased));
}

/// Release drops the region, is idempotent, and fails every later
/// transform in both split and in-place form.
#[test_log::test(tokio::test)]
async fn released_sessions_refuse_transforms() {
    let service = Arc::new(EchoDescrambler::new());
    let session = DescrambleSession::new(Arc::clone(&service));

    // A first transform grows the region so the release visibly drops it.
    let src_storage = vec![7u8; 32];
    let mut dst_storage = vec![0u8; 32];
    let src = BufferWindow::full(&src_storage);
    let mut dst = BufferWindowMut::full(&mut dst_storage);
    let info = SubsampleInfo { count: 1, clear: Some(&[32]), encrypted: None };
    session
        .descramble(ScramblingControl::EvenKey, info, &src, &mut dst)
        .await
        .unwrap();
    assert_eq!(session.transport_capacity().await, GROWTH_QUANTUM);

    session.release().await;
    session.release().await;
    assert_eq!(session.transport_capacity().await, 0);

    let err = session
        .descramble(ScramblingControl::EvenKey, info, &src, &mut dst)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionReleased));

    let mut in_place_storage = vec![1u8; 8];
    let mut buffer = BufferWindowMut::full(&mut in_place_storage);
    let in_place_info = SubsampleInfo { count: 1, clear: Some(&[8]), encrypted: None };
    let err = session
        .descramble_in_place(ScramblingControl::OddKey, in_place_info, &mut buffer)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionReleased));

    assert_eq!(service.calls(), 1);
}

/// A pre-grown region covers transforms up to its size without another
/// allocation.
#[tokio::test]
async fn preallocated_sessions_cover_transforms_without_growing() {
    let session = DescrambleSession::with_capacity(EchoDescrambler::new(), 100_000).unwrap();
    assert_eq!(session.transport_capacity().await, 2 * GROWTH_QUANTUM);

    let src_storage = vec![2u8; 50_000];
    let mut dst_storage = vec![0u8; 50_000];
    let src = BufferWindow::full(&src_storage);
    let mut dst = BufferWindowMut::full(&mut dst_storage);
    let info = SubsampleInfo {
        count: 1,
        clear: Some(&[50_000]),
        encrypted: None,
    };

    let written = session
        .descramble(ScramblingControl::EvenKey, info, &src, &mut dst)
        .await
        .unwrap();

    assert_eq!(written, 50_000);
    assert_eq!(dst_storage, src_storage);
    assert_eq!(session.transport_capacity().await, 2 * GROWTH_QUANTUM);
}

/// Asking for a region no allocator can provide fails cleanly instead of
/// aborting.
#[test]
fn oversized_preallocation_fails_cleanly() {
    let Err(error) = DescrambleSession::with_capacity(EchoDescrambler::new(), usize::MAX) else {
        panic!("a region of usize::MAX bytes must not allocate");
    };
    assert!(matches!(error, Error::OutOfMemory(usize::MAX)));
}

/// Sessions are built from bindings only while the binding still resolves.
#[tokio::test]
async fn binding_resolution_gates_session_construction() {
    let Err(error) = DescrambleSession::bind(&StaleBinding) else {
        panic!("a stale binding must not produce a session");
    };
    assert!(matches!(error, Error::UnresolvedDescrambler));

    let session = DescrambleSession::bind(&LiveBinding).unwrap();
    let src_storage = vec![5u8; 16];
    let mut dst_storage = vec![0u8; 16];
    let src = BufferWindow::full(&src_storage);
    let mut dst = BufferWindowMut::full(&mut dst_storage);
    let info = SubsampleInfo { count: 1, clear: Some(&[16]), encrypted: None };

    let written = session
        .descramble(ScramblingControl::OddKey, info, &src, &mut dst)
        .await
        .unwrap();

    assert_eq!(written, 16);
    assert_eq!(dst_storage, src_storage);
}
