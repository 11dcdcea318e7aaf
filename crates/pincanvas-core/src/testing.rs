//! Test helpers: a minimal executor and a shared multi-user fixture.

use crate::config::SessionConfig;
use crate::model::{Canvas, CanvasId, Layer, Profile, UserId};
use crate::remote::MemoryRemote;
use crate::session::Session;
use crate::storage::{LocalCache, MemoryStorage};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Simple blocking executor for tests.
pub(crate) fn block_on<F: Future>(f: F) -> F::Output {
    use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

    fn dummy_raw_waker() -> RawWaker {
        fn no_op(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            dummy_raw_waker()
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }

    let waker = unsafe { Waker::from_raw(dummy_raw_waker()) };
    let mut cx = Context::from_waker(&waker);
    let mut f = std::pin::pin!(f);

    loop {
        if let Poll::Ready(result) = f.as_mut().poll(&mut cx) {
            return result;
        }
    }
}

/// One shared remote store and three registered users.
pub(crate) struct Fixture {
    pub remote: Arc<MemoryRemote>,
    pub owner: UserId,
    pub editor: UserId,
    pub viewer: UserId,
}

impl Fixture {
    pub fn new() -> Self {
        let remote = Arc::new(MemoryRemote::new());
        let fixture = Self {
            remote,
            owner: Uuid::new_v4(),
            editor: Uuid::new_v4(),
            viewer: Uuid::new_v4(),
        };
        for (user, name) in [
            (fixture.owner, "owner"),
            (fixture.editor, "editor"),
            (fixture.viewer, "viewer"),
        ] {
            fixture.remote.add_profile(Profile {
                user_id: user,
                display_name: Some(name.to_string()),
                email: Some(format!("{}@example.com", name)),
                avatar_url: None,
            });
        }
        fixture
    }

    /// A session for `user` with its own in-memory cache.
    pub fn session(&self, user: UserId) -> Session<MemoryRemote> {
        self.session_with_storage(user, Arc::new(MemoryStorage::new()))
    }

    pub fn session_with_storage(&self, user: UserId, storage: Arc<MemoryStorage>) -> Session<MemoryRemote> {
        Session::new(
            user,
            self.remote.clone(),
            LocalCache::new(storage),
            SessionConfig::default(),
        )
    }

    /// Create and enter a canvas with a single "Food" layer.
    pub fn canvas_with_layer(&self, session: &Session<MemoryRemote>) -> (Canvas, Layer) {
        let canvas = block_on(session.canvases().create("trip-plan", Some("seoul.png".to_string()))).unwrap();
        block_on(session.enter_canvas(canvas.id)).unwrap();
        let layer = block_on(session.layers().create(canvas.id, "Food", "#ef4444")).unwrap();
        (canvas, layer)
    }

    pub fn share(&self, session: &Session<MemoryRemote>, canvas_id: CanvasId, user: UserId, permission: &str) {
        block_on(session.sharing().create_share(canvas_id, user, permission)).unwrap();
    }
}
