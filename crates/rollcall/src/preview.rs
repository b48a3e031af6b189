//! Debug preview: the live frame with face boxes, plus the exit key.

use image::RgbImage;
use minifb::{Key, Window, WindowOptions};
use rollcall_core::BoundingBox;

const GREEN: u32 = 0x00ff00;
const BLUE: u32 = 0x0000ff;
const BOX_THICKNESS: usize = 2;
const LABEL_STRIP_HEIGHT: usize = 35;
const WINDOW_TITLE: &str = "rollcall";

/// How a face should be drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    Recognized,
    Unrecognized,
}

/// One face to draw, in full-frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub face: BoundingBox,
    pub label: String,
    pub kind: OverlayKind,
}

impl Overlay {
    pub fn recognized(face: BoundingBox, label: impl Into<String>) -> Self {
        Self {
            face,
            label: label.into(),
            kind: OverlayKind::Recognized,
        }
    }

    pub fn unrecognized(face: BoundingBox) -> Self {
        Self {
            face,
            label: "Not Found".to_string(),
            kind: OverlayKind::Unrecognized,
        }
    }
}

/// Where annotated frames go.
pub trait Preview {
    fn present(&mut self, frame: &RgbImage, overlays: &[Overlay]);

    /// Polled once per frame.
    fn exit_requested(&self) -> bool;

    fn close(&mut self);
}

impl<P: Preview + ?Sized> Preview for Box<P> {
    fn present(&mut self, frame: &RgbImage, overlays: &[Overlay]) {
        (**self).present(frame, overlays)
    }

    fn exit_requested(&self) -> bool {
        (**self).exit_requested()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// No window; exit only via Ctrl-C.
pub struct Headless;

impl Preview for Headless {
    fn present(&mut self, _frame: &RgbImage, _overlays: &[Overlay]) {}

    fn exit_requested(&self) -> bool {
        false
    }

    fn close(&mut self) {}
}

/// minifb window. `q` or Escape (or closing the window) requests exit.
pub struct WindowPreview {
    window: Option<Window>,
    buffer: Vec<u32>,
    width: usize,
    height: usize,
}

impl WindowPreview {
    pub fn open(width: u32, height: u32) -> Result<Self, minifb::Error> {
        let (width, height) = (width as usize, height as usize);
        let mut window = Window::new(
            WINDOW_TITLE,
            width,
            height,
            WindowOptions {
                resize: false,
                ..WindowOptions::default()
            },
        )?;
        window.set_target_fps(30);
        tracing::info!(width, height, "preview window opened; press q to quit");

        Ok(Self {
            window: Some(window),
            buffer: vec![0u32; width * height],
            width,
            height,
        })
    }
}

impl Preview for WindowPreview {
    fn present(&mut self, frame: &RgbImage, overlays: &[Overlay]) {
        let Some(window) = self.window.as_mut() else {
            return;
        };

        blit(&mut self.buffer, self.width, self.height, frame);
        for overlay in overlays {
            draw_overlay(&mut self.buffer, self.width, self.height, overlay);
        }

        // minifb draws no text; labels go to the title bar.
        let labels: Vec<&str> = overlays.iter().map(|o| o.label.as_str()).collect();
        if labels.is_empty() {
            window.set_title(WINDOW_TITLE);
        } else {
            window.set_title(&format!("{WINDOW_TITLE} | {}", labels.join(" | ")));
        }

        if let Err(e) = window.update_with_buffer(&self.buffer, self.width, self.height) {
            tracing::warn!(error = %e, "preview update failed");
        }
    }

    fn exit_requested(&self) -> bool {
        match &self.window {
            Some(w) => !w.is_open() || w.is_key_down(Key::Q) || w.is_key_down(Key::Escape),
            None => false,
        }
    }

    fn close(&mut self) {
        if self.window.take().is_some() {
            tracing::debug!("preview window closed");
        }
    }
}

/// Copy an RGB frame into a 0RGB framebuffer; pixels outside either are dropped.
fn blit(fb: &mut [u32], w: usize, h: usize, frame: &RgbImage) {
    fb.fill(0);
    for (x, y, px) in frame.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        if x < w && y < h {
            let [r, g, b] = px.0;
            fb[y * w + x] = ((r as u32) << 16) | ((g as u32) << 8) | b as u32;
        }
    }
}

fn draw_overlay(fb: &mut [u32], w: usize, h: usize, overlay: &Overlay) {
    let clamp = |v: f32, max: usize| (v.max(0.0) as usize).min(max);
    let x1 = clamp(overlay.face.x, w);
    let y1 = clamp(overlay.face.y, h);
    let x2 = clamp(overlay.face.right(), w);
    let y2 = clamp(overlay.face.bottom(), h);

    match overlay.kind {
        OverlayKind::Recognized => {
            draw_box(fb, w, h, x1, y1, x2, y2, GREEN);
            // Banner where the details would be printed.
            fill_rect(fb, w, h, 10, 10, 640, 50, GREEN);
        }
        OverlayKind::Unrecognized => {
            draw_box(fb, w, h, x1, y1, x2, y2, BLUE);
            let strip_top = y2.saturating_sub(LABEL_STRIP_HEIGHT).max(y1);
            fill_rect(fb, w, h, x1, strip_top, x2.saturating_sub(x1), y2.saturating_sub(strip_top), BLUE);
        }
    }
}

/// Draw a filled rectangle.
#[allow(clippy::too_many_arguments)]
fn fill_rect(fb: &mut [u32], w: usize, h: usize, rx: usize, ry: usize, rw: usize, rh: usize, color: u32) {
    for y in ry..(ry + rh).min(h) {
        for x in rx..(rx + rw).min(w) {
            fb[y * w + x] = color;
        }
    }
}

/// Draw a hollow rectangle from (x1, y1) to (x2, y2) exclusive.
#[allow(clippy::too_many_arguments)]
fn draw_box(fb: &mut [u32], w: usize, h: usize, x1: usize, y1: usize, x2: usize, y2: usize, color: u32) {
    let (bw, bh) = (x2.saturating_sub(x1), y2.saturating_sub(y1));
    let t = BOX_THICKNESS;
    fill_rect(fb, w, h, x1, y1, bw, t.min(bh), color);
    fill_rect(fb, w, h, x1, y2.saturating_sub(t).max(y1), bw, t.min(bh), color);
    fill_rect(fb, w, h, x1, y1, t.min(bw), bh, color);
    fill_rect(fb, w, h, x2.saturating_sub(t).max(x1), y1, t.min(bw), bh, color);
}
