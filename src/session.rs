//! The control side of an interactive merge: background loading and
//! exporting, plus forwarding of edits to the render thread.

use std::{path::PathBuf, sync::Arc};

use job_queue::JobQueue;

use crate::{
    job_helpers::load_image, render_thread::DEFAULT_GAMMA, ExposureStack, ImageInfo,
    PresentationSink, RenderThread,
};

/// Preview settings an interactive session starts out with.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RenderConfig {
    pub gamma: f32,
    pub scale: usize,
}

impl Default for RenderConfig {
    fn default() -> RenderConfig {
        RenderConfig {
            gamma: DEFAULT_GAMMA,
            scale: 1,
        }
    }
}

pub struct Session {
    job_queue: JobQueue,
    render: Arc<RenderThread>,
}

impl Session {
    pub fn new<S: PresentationSink + 'static>(config: RenderConfig, sink: S) -> Session {
        let mut stack = ExposureStack::new();
        stack.set_scale(config.scale);
        Session {
            job_queue: JobQueue::new(),
            render: Arc::new(RenderThread::new(stack, config.gamma, sink)),
        }
    }

    pub fn job_queue(&self) -> &JobQueue {
        &self.job_queue
    }

    pub fn render_thread(&self) -> &RenderThread {
        &self.render
    }

    /// Loads images in the background and adds them to the stack.
    ///
    /// Files that fail to load, or don't match the resolution of what's
    /// already loaded, are skipped and logged.
    pub fn add_image_files(&self, paths: Vec<PathBuf>) -> bool {
        let render = Arc::clone(&self.render);

        self.job_queue.add_job("Add Image(s)", move |status| {
            let len = paths.len() as f32;
            let mut loaded = Vec::new();
            for (img_i, path) in paths.iter().enumerate() {
                if status.is_canceled() {
                    break;
                }
                status.set_progress(
                    format!("Loading: {}", path.to_string_lossy()),
                    (img_i + 1) as f32 / len,
                );

                let layer = match load_image(path) {
                    Ok(layer) => layer,
                    Err(e) => {
                        status.log_error(e.to_string());
                        continue;
                    }
                };
                if layer.info.exposure.is_none() {
                    status.log_warning(format!(
                        "Image file lacks Exif data needed to compute exposure value: \"{}\".  Exposure will be estimated from the image.",
                        path.to_string_lossy()
                    ));
                }
                loaded.push((path, layer));
            }

            // Push and sort in one go, so the renderer never sees the
            // stack half-built.
            let (added, rejected) = render.with_stack_mut(|stack| {
                let mut added = 0;
                let mut rejected = Vec::new();
                for (path, layer) in loaded {
                    match stack.push(layer) {
                        Ok(()) => added += 1,
                        Err(e) => rejected.push(format!("\"{}\": {}", path.to_string_lossy(), e)),
                    }
                }
                if added > 0 {
                    stack.sort();
                }
                (added, rejected)
            });

            for message in rejected {
                status.log_error(message);
            }
            if added > 0 {
                status.log_note(format!("Added {} image(s).", added));
            }
            Ok::<(), String>(())
        })
    }

    pub fn remove_image(&self, index: usize) {
        self.render.with_stack_mut(|stack| {
            if index < stack.len() {
                stack.remove(index);
            }
        });
    }

    /// Exports the current merge in the background.
    ///
    /// The export works from a snapshot, so edits made while it runs
    /// don't end up in the file.
    pub fn save_hdri(&self, path: PathBuf) -> bool {
        let snapshot = self.render.with_stack(|stack| stack.clone());

        self.job_queue.add_job("Save HDRI", move |status| {
            status.set_progress(format!("Saving: {}", path.to_string_lossy()), 0.0);
            snapshot.save_hdr(&path)?;
            status.log_note(format!("Saved \"{}\".", path.to_string_lossy()));
            Ok::<(), crate::ExportError>(())
        })
    }

    pub fn image_infos(&self) -> Vec<ImageInfo> {
        self.render
            .with_stack(|stack| stack.layers().iter().map(|l| l.info.clone()).collect())
    }

    /// Per-layer (threshold, relative exposure).
    pub fn layer_parameters(&self) -> Vec<(u16, f32)> {
        self.render.with_stack(|stack| {
            stack
                .layers()
                .iter()
                .map(|l| (l.threshold(), l.relative_exposure()))
                .collect()
        })
    }

    pub fn image_count(&self) -> usize {
        self.render.with_stack(|stack| stack.len())
    }

    //----------------------------------------------------------------
    // Edits.  Layer indices outside the stack are ignored.

    fn has_layer(&self, index: usize) -> bool {
        index < self.image_count()
    }

    pub fn set_threshold(&self, index: usize, level: u8) -> bool {
        let ok = self.has_layer(index);
        if ok {
            self.render.set_exposure_threshold(index, level);
        }
        ok
    }

    pub fn set_relative_exposure(&self, index: usize, relative_exposure: f32) -> bool {
        let ok = self.has_layer(index) && relative_exposure.is_finite() && relative_exposure > 0.0;
        if ok {
            self.render.set_exposure_relative_ev(index, relative_exposure);
        }
        ok
    }

    pub fn set_gamma(&self, gamma: f32) -> bool {
        let ok = gamma.is_finite() && gamma > 0.0;
        if ok {
            self.render.set_gamma(gamma);
        }
        ok
    }

    pub fn set_viewport(&self, x: usize, y: usize, width: usize, height: usize, scale: usize) -> bool {
        let ok = scale >= 1;
        if ok {
            self.render.set_image_viewport(x, y, width, height, scale);
        }
        ok
    }

    pub fn include_pixels(&self, index: usize, x: usize, y: usize, radius: usize) -> bool {
        let ok = self.has_layer(index);
        if ok {
            self.render.include_pixels(index, x, y, radius);
        }
        ok
    }

    pub fn exclude_pixels(&self, index: usize, x: usize, y: usize, radius: usize) -> bool {
        let ok = self.has_layer(index);
        if ok {
            self.render.exclude_pixels(index, x, y, radius);
        }
        ok
    }
}
