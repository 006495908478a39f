use std::{sync::Arc, thread::JoinHandle};

use crossbeam::channel::{Receiver, Sender};

use crate::{animation::clip::AnimationSource, error::LoadError, model::ModelAsset};

/// Identifies one `load_vrm` call. Anything tagged with an older generation
/// belongs to a model that has since been replaced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoadGeneration(pub u64);
impl LoadGeneration {
    pub fn next(self) -> Self {
        LoadGeneration(self.0.wrapping_add(1))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClipRole {
    /// played once when the model appears
    Intro,
    /// looped afterwards
    Default,
}

pub trait ModelLoader: Send + Sync {
    fn load(&self, url: &str) -> Result<ModelAsset, LoadError>;
}

pub trait AnimationLoader: Send + Sync {
    /// `Ok(None)` means the asset holds no usable animation.
    fn load(&self, url: &str) -> Result<Option<AnimationSource>, LoadError>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum LoadRequest {
    Model { generation: LoadGeneration, url: String },
    Animation { generation: LoadGeneration, role: ClipRole, url: String },
}

#[derive(Debug)]
pub enum LoadResponse {
    Model {
        generation: LoadGeneration,
        url: String,
        result: Result<ModelAsset, LoadError>,
    },
    Animation {
        generation: LoadGeneration,
        role: ClipRole,
        url: String,
        result: Result<Option<AnimationSource>, LoadError>,
    },
}

impl LoadResponse {
    pub fn generation(&self) -> LoadGeneration {
        match self {
            LoadResponse::Model { generation, .. } => *generation,
            LoadResponse::Animation { generation, .. } => *generation,
        }
    }
}

/// Viewer side of the loader channels.
pub struct AssetChannels {
    pub req_tx: Sender<LoadRequest>,
    pub res_rx: Receiver<LoadResponse>,
}

/// Loader side of the channels.
pub struct LoaderEndpoint {
    pub req_rx: Receiver<LoadRequest>,
    pub res_tx: Sender<LoadResponse>,
}

pub fn asset_channels() -> (AssetChannels, LoaderEndpoint) {
    let (req_tx, req_rx) = crossbeam::channel::unbounded();
    let (res_tx, res_rx) = crossbeam::channel::unbounded();
    (AssetChannels { req_tx, res_rx }, LoaderEndpoint { req_rx, res_tx })
}

pub fn execute(request: LoadRequest, models: &dyn ModelLoader, animations: &dyn AnimationLoader) -> LoadResponse {
    match request {
        LoadRequest::Model { generation, url } => {
            let result = models.load(&url);
            LoadResponse::Model { generation, url, result }
        }
        LoadRequest::Animation { generation, role, url } => {
            let result = animations.load(&url);
            LoadResponse::Animation { generation, role, url, result }
        }
    }
}

impl LoaderEndpoint {
    /// Answers every request queued so far on the calling thread. Returns how
    /// many were served.
    pub fn serve_pending(&self, models: &dyn ModelLoader, animations: &dyn AnimationLoader) -> usize {
        let mut served = 0;
        while let Ok(request) = self.req_rx.try_recv() {
            if self.res_tx.send(execute(request, models, animations)).is_err() {
                break;
            }
            served += 1;
        }
        served
    }
}

fn worker_loop(
    rx: Receiver<LoadRequest>,
    tx: Sender<LoadResponse>,
    models: Arc<dyn ModelLoader>,
    animations: Arc<dyn AnimationLoader>,
) {
    while let Ok(request) = rx.recv() {
        log::debug!("loading {request:?}");
        if tx.send(execute(request, models.as_ref(), animations.as_ref())).is_err() {
            break;
        }
    }
}

pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}
impl WorkerPool {
    /// Workers exit once the viewer side of the channels is dropped.
    pub fn spawn(
        endpoint: LoaderEndpoint,
        worker_count: usize,
        models: Arc<dyn ModelLoader>,
        animations: Arc<dyn AnimationLoader>,
    ) -> Self {
        let workers = (0..worker_count.max(1))
            .map(|_| {
                let rx = endpoint.req_rx.clone();
                let tx = endpoint.res_tx.clone();
                let models = models.clone();
                let animations = animations.clone();
                std::thread::spawn(move || worker_loop(rx, tx, models, animations))
            })
            .collect();
        Self { workers }
    }

    pub fn join(self) {
        for worker in self.workers {
            if worker.join().is_err() {
                log::warn!("asset loader worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    struct Fixed;
    impl ModelLoader for Fixed {
        fn load(&self, url: &str) -> Result<ModelAsset, LoadError> {
            if url.ends_with(".vrm") {
                Ok(ModelAsset::default())
            } else {
                Err(LoadError::MissingHumanoid)
            }
        }
    }
    impl AnimationLoader for Fixed {
        fn load(&self, _url: &str) -> Result<Option<AnimationSource>, LoadError> {
            Ok(None)
        }
    }

    #[test]
    fn serve_pending_answers_in_request_order() {
        let (viewer, loader) = asset_channels();
        viewer.req_tx.send(LoadRequest::Model { generation: LoadGeneration(1), url: "a.vrm".into() }).unwrap();
        viewer
            .req_tx
            .send(LoadRequest::Animation { generation: LoadGeneration(1), role: ClipRole::Intro, url: "a.vrma".into() })
            .unwrap();
        assert_eq!(loader.serve_pending(&Fixed, &Fixed), 2);

        let responses: Vec<_> = viewer.res_rx.try_iter().collect();
        assert!(matches!(responses[0], LoadResponse::Model { result: Ok(_), .. }));
        assert!(matches!(responses[1], LoadResponse::Animation { role: ClipRole::Intro, result: Ok(None), .. }));
    }

    #[test]
    fn pool_serves_requests_and_exits_when_viewer_side_drops() {
        let (viewer, loader) = asset_channels();
        let pool = WorkerPool::spawn(loader, 2, Arc::new(Fixed), Arc::new(Fixed));
        viewer.req_tx.send(LoadRequest::Model { generation: LoadGeneration(7), url: "bad.glb".into() }).unwrap();

        let response = viewer.res_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(response.generation(), LoadGeneration(7));
        assert!(matches!(response, LoadResponse::Model { result: Err(LoadError::MissingHumanoid), .. }));

        drop(viewer);
        pool.join();
    }
}
