use std::collections::HashSet;
use std::sync::Arc;

use crate::formats::{BookManifest, ReaderContent, ReaderScene, Scene};
use crate::generate::ContentGenerator;

pub const DEFAULT_BATCH_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerState {
    Init,
    Generating,
    Ready,
}

/// Vertical extent of the visible area, in layout units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub top: f64,
    pub height: f64,
}

/// Where a scene was laid out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneRect {
    pub scene_id: u32,
    pub top: f64,
    pub height: f64,
}

impl SceneRect {
    fn center(&self) -> f64 {
        self.top + self.height / 2.0
    }

    fn intersects(&self, viewport: &Viewport) -> bool {
        self.top < viewport.top + viewport.height && self.top + self.height > viewport.top
    }
}

/// The intersecting scene whose center is closest to the viewport center.
/// Ties go to the scene laid out first.
pub fn active_scene(viewport: &Viewport, rects: &[SceneRect]) -> Option<u32> {
    let center = viewport.top + viewport.height / 2.0;
    let mut best: Option<(f64, u32)> = None;
    for rect in rects.iter().filter(|rect| rect.intersects(viewport)) {
        let distance = (rect.center() - center).abs();
        match best {
            Some((best_distance, _)) if best_distance <= distance => {}
            _ => best = Some((distance, rect.scene_id)),
        }
    }
    best.map(|(_, scene_id)| scene_id)
}

/// What a media refresh did for the active scene.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaRefresh {
    pub image_requested: bool,
    pub image_attached: bool,
    pub audio_requested: bool,
    pub audio_attached: bool,
}

/// Drives one open book: the first generation cycle, visibility-driven media
/// and incremental extension.
///
/// The loader owns its copy of the manifest. Callers read it back with
/// [`ViewerLoader::book`] or [`ViewerLoader::into_book`] and write it to the
/// catalog themselves.
pub struct ViewerLoader {
    book: BookManifest,
    generator: Arc<dyn ContentGenerator>,
    state: ViewerState,
    opened: bool,
    end_of_archive: bool,
    active_scene_id: Option<u32>,
    image_requests: HashSet<u32>,
    audio_requests: HashSet<u32>,
}

impl ViewerLoader {
    pub fn new(book: BookManifest, generator: Arc<dyn ContentGenerator>) -> Self {
        Self {
            book,
            generator,
            state: ViewerState::Init,
            opened: false,
            end_of_archive: false,
            active_scene_id: None,
            image_requests: HashSet::new(),
            audio_requests: HashSet::new(),
        }
    }

    pub fn state(&self) -> ViewerState {
        self.state
    }

    pub fn is_end_of_archive(&self) -> bool {
        self.end_of_archive
    }

    pub fn book(&self) -> &BookManifest {
        &self.book
    }

    pub fn into_book(self) -> BookManifest {
        self.book
    }

    pub fn active_scene_id(&self) -> Option<u32> {
        self.active_scene_id
    }

    /// Runs the initial load once. Later calls return the current state.
    pub async fn open(&mut self, count: usize) -> ViewerState {
        if self.opened {
            return self.state;
        }
        self.opened = true;

        if !self.book.scenes.is_empty() || self.book.reader_content.is_some() {
            tracing::info!(
                book_id = %self.book.id,
                scenes = self.book.scenes.len(),
                "opening archived book"
            );
            self.state = ViewerState::Ready;
            return self.state;
        }

        self.state = ViewerState::Generating;
        tracing::info!(book_id = %self.book.id, count, "generating opening scenes");
        let scenes = self
            .generator
            .generate_book_content(&self.book, 1, count)
            .await;
        if scenes.is_empty() && count > 0 {
            self.end_of_archive = true;
        }
        self.append_scenes(scenes);

        self.state = ViewerState::Ready;
        self.state
    }

    /// Records the layout and returns the newly active scene.
    pub fn update_visibility(&mut self, viewport: &Viewport, rects: &[SceneRect]) -> Option<u32> {
        let active = active_scene(viewport, rects);
        if active != self.active_scene_id {
            tracing::debug!(book_id = %self.book.id, scene_id = ?active, "active scene changed");
        }
        self.active_scene_id = active;
        active
    }

    pub fn set_active_scene(&mut self, scene_id: Option<u32>) {
        self.active_scene_id = scene_id;
    }

    /// Requests whatever media the active scene is missing.
    ///
    /// Each kind is requested at most once per scene id, and never once the
    /// field is populated. A failed request leaves the field empty.
    pub async fn refresh_active_media(&mut self) -> MediaRefresh {
        let mut refresh = MediaRefresh::default();
        let Some(scene_id) = self.active_scene_id else {
            return refresh;
        };
        let Some(scene) = self.book.scene(scene_id) else {
            return refresh;
        };

        let want_image =
            scene.generated_image_url.is_none() && !self.image_requests.contains(&scene_id);
        let want_audio =
            scene.generated_audio_url.is_none() && !self.audio_requests.contains(&scene_id);
        if !want_image && !want_audio {
            return refresh;
        }

        let image_prompt = self.image_prompt(scene);
        let narration = scene.text.clone();
        if want_image {
            self.image_requests.insert(scene_id);
        }
        if want_audio {
            self.audio_requests.insert(scene_id);
        }
        refresh.image_requested = want_image;
        refresh.audio_requested = want_audio;

        let generator = Arc::clone(&self.generator);
        let book_id = self.book.id.clone();
        let voice = self.book.audio_profile.narrator_voice.clone();
        let image = async {
            if want_image {
                generator
                    .generate_image(&image_prompt, &book_id, scene_id)
                    .await
            } else {
                None
            }
        };
        let audio = async {
            if want_audio {
                generator
                    .generate_audio(&narration, &voice, &book_id, scene_id)
                    .await
            } else {
                None
            }
        };
        let (image_url, audio_url) = tokio::join!(image, audio);

        if let Some(scene) = self.scene_mut(scene_id) {
            if let Some(url) = image_url
                && scene.generated_image_url.is_none()
            {
                scene.generated_image_url = Some(url);
                refresh.image_attached = true;
            }
            if let Some(url) = audio_url
                && scene.generated_audio_url.is_none()
            {
                scene.generated_audio_url = Some(url);
                refresh.audio_attached = true;
            }
        }

        tracing::info!(
            book_id = %self.book.id,
            scene_id,
            image = refresh.image_attached,
            audio = refresh.audio_attached,
            "media refreshed"
        );
        refresh
    }

    /// Extends the book by up to `count` scenes after the last one.
    ///
    /// Returns how many scenes were appended. An empty batch marks the end of
    /// the archive and further calls do nothing.
    pub async fn load_more(&mut self, count: usize) -> usize {
        if self.end_of_archive || count == 0 {
            return 0;
        }
        let start_id = self.book.last_scene_id().map_or(1, |id| id + 1);
        let scenes = self
            .generator
            .generate_book_content(&self.book, start_id, count)
            .await;

        if scenes.is_empty() {
            tracing::info!(book_id = %self.book.id, start_id, "end of archive");
            self.end_of_archive = true;
            return 0;
        }
        let appended = scenes.len();
        self.append_scenes(scenes);
        appended
    }

    /// Reader projection of the current scenes.
    pub fn reader_content(&self) -> ReaderContent {
        if self.book.scenes.is_empty()
            && let Some(cached) = &self.book.reader_content
        {
            return cached.clone();
        }
        ReaderContent {
            scenes: self
                .book
                .scenes
                .iter()
                .map(|scene| ReaderScene {
                    heading: if scene.heading.is_empty() {
                        format!("SECTION {}", scene.id)
                    } else {
                        scene.heading.clone()
                    },
                    text: scene.text.clone(),
                    image_url: scene.generated_image_url.clone(),
                    visual_cue: (!scene.image_prompt.is_empty())
                        .then(|| scene.image_prompt.clone()),
                })
                .collect(),
            master_image_url: self.book.cover_image.clone(),
            video_url: self
                .book
                .reader_content
                .as_ref()
                .and_then(|content| content.video_url.clone()),
        }
    }

    fn append_scenes(&mut self, scenes: Vec<Scene>) {
        let count = scenes.len();
        self.book.scenes.extend(scenes);
        tracing::debug!(book_id = %self.book.id, appended = count, total = self.book.scenes.len(), "scenes appended");
    }

    fn scene_mut(&mut self, scene_id: u32) -> Option<&mut Scene> {
        self.book.scenes.iter_mut().find(|scene| scene.id == scene_id)
    }

    fn image_prompt(&self, scene: &Scene) -> String {
        let subject = if scene.image_prompt.is_empty() {
            scene.heading.as_str()
        } else {
            scene.image_prompt.as_str()
        };
        format!(
            "{subject}. Style: {}, {} aesthetic, detailed, cinematic lighting.",
            self.book.tags.join(", "),
            self.book.theme.background_style.as_keyword()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::generate::placeholder_scenes;

    #[derive(Default)]
    struct FakeGenerator {
        batches: Mutex<Vec<usize>>,
        scene_calls: Mutex<Vec<(u32, usize)>>,
        image_calls: Mutex<Vec<u32>>,
        audio_calls: Mutex<Vec<u32>>,
        fail_media: bool,
    }

    impl FakeGenerator {
        fn with_batches(batches: Vec<usize>) -> Self {
            Self {
                batches: Mutex::new(batches),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ContentGenerator for FakeGenerator {
        async fn generate_book_content(
            &self,
            _book: &BookManifest,
            start_id: u32,
            count: usize,
        ) -> Vec<Scene> {
            self.scene_calls.lock().unwrap().push((start_id, count));
            let mut batches = self.batches.lock().unwrap();
            let size = if batches.is_empty() {
                count
            } else {
                batches.remove(0)
            };
            placeholder_scenes(start_id, size)
        }

        async fn generate_image(&self, _prompt: &str, _book_id: &str, scene_id: u32) -> Option<String> {
            self.image_calls.lock().unwrap().push(scene_id);
            (!self.fail_media).then(|| format!("data:image/png;base64,{scene_id}"))
        }

        async fn generate_audio(
            &self,
            _text: &str,
            _voice: &str,
            _book_id: &str,
            scene_id: u32,
        ) -> Option<String> {
            self.audio_calls.lock().unwrap().push(scene_id);
            (!self.fail_media).then(|| format!("data:audio/wav;base64,{scene_id}"))
        }
    }

    fn empty_book() -> BookManifest {
        serde_json::from_value(serde_json::json!({
            "id": "b", "title": "T", "author": "A", "publicationYear": 1950,
            "description": "", "coverImage": "cover.png", "tags": ["Noir"]
        }))
        .unwrap()
    }

    fn rect(scene_id: u32, top: f64) -> SceneRect {
        SceneRect {
            scene_id,
            top,
            height: 100.0,
        }
    }

    #[test]
    fn most_centered_intersecting_scene_is_active() {
        let viewport = Viewport {
            top: 150.0,
            height: 200.0,
        };
        let rects = [rect(1, 0.0), rect(2, 100.0), rect(3, 200.0), rect(4, 400.0)];
        assert_eq!(active_scene(&viewport, &rects), Some(3));

        let far = Viewport {
            top: 1000.0,
            height: 100.0,
        };
        assert_eq!(active_scene(&far, &rects), None);
    }

    #[tokio::test]
    async fn open_generates_once_then_is_ready() {
        let generator = Arc::new(FakeGenerator::default());
        let mut loader = ViewerLoader::new(empty_book(), generator.clone());
        assert_eq!(loader.state(), ViewerState::Init);

        assert_eq!(loader.open(3).await, ViewerState::Ready);
        assert_eq!(loader.open(3).await, ViewerState::Ready);

        assert_eq!(generator.scene_calls.lock().unwrap().as_slice(), &[(1, 3)]);
        let ids = loader.book().scenes.iter().map(|s| s.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn cached_scenes_skip_generation() {
        let generator = Arc::new(FakeGenerator::default());
        let mut book = empty_book();
        book.scenes = placeholder_scenes(0, 2);

        let mut loader = ViewerLoader::new(book, generator.clone());
        assert_eq!(loader.open(3).await, ViewerState::Ready);
        assert!(generator.scene_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_more_continues_after_last_id_until_exhausted() {
        let generator = Arc::new(FakeGenerator::with_batches(vec![2, 2, 0]));
        let mut loader = ViewerLoader::new(empty_book(), generator.clone());
        loader.open(2).await;

        assert_eq!(loader.load_more(2).await, 2);
        assert_eq!(loader.load_more(2).await, 0);
        assert!(loader.is_end_of_archive());
        assert_eq!(loader.load_more(2).await, 0);

        assert_eq!(
            generator.scene_calls.lock().unwrap().as_slice(),
            &[(1, 2), (3, 2), (5, 2)]
        );
        assert_eq!(loader.book().last_scene_id(), Some(4));
    }

    #[tokio::test]
    async fn media_is_requested_once_per_scene_and_kept() {
        let generator = Arc::new(FakeGenerator::default());
        let mut loader = ViewerLoader::new(empty_book(), generator.clone());
        loader.open(3).await;

        let viewport = Viewport {
            top: 0.0,
            height: 100.0,
        };
        let rects = [rect(1, 0.0), rect(2, 100.0), rect(3, 200.0)];
        assert_eq!(loader.update_visibility(&viewport, &rects), Some(1));

        let first = loader.refresh_active_media().await;
        assert!(first.image_attached && first.audio_attached);
        let second = loader.refresh_active_media().await;
        assert_eq!(second, MediaRefresh::default());

        assert_eq!(generator.image_calls.lock().unwrap().as_slice(), &[1]);
        assert_eq!(generator.audio_calls.lock().unwrap().as_slice(), &[1]);
        let scene = loader.book().scene(1).unwrap();
        assert!(scene.has_all_media());
        assert!(loader.book().scene(2).unwrap().generated_image_url.is_none());
    }

    #[tokio::test]
    async fn failed_media_is_not_retried() {
        let generator = Arc::new(FakeGenerator {
            fail_media: true,
            ..FakeGenerator::default()
        });
        let mut loader = ViewerLoader::new(empty_book(), generator.clone());
        loader.open(1).await;
        loader.set_active_scene(Some(1));

        let refresh = loader.refresh_active_media().await;
        assert!(refresh.image_requested && !refresh.image_attached);
        loader.refresh_active_media().await;

        assert_eq!(generator.image_calls.lock().unwrap().len(), 1);
        assert!(loader.book().scene(1).unwrap().generated_image_url.is_none());
    }

    #[test]
    fn reader_content_projects_scenes() {
        let mut book = empty_book();
        book.scenes = placeholder_scenes(1, 2);
        book.scenes[0].heading.clear();
        let loader = ViewerLoader::new(book, Arc::new(FakeGenerator::default()));

        let content = loader.reader_content();
        assert_eq!(content.scenes.len(), 2);
        assert_eq!(content.scenes[0].heading, "SECTION 1");
        assert_eq!(content.master_image_url, "cover.png");
    }
}
