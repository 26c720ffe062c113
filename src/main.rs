use raylib::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use video_wi::config::Config;
use video_wi::init;
use video_wi::pipeline;
use video_wi::platform;
use video_wi::{FrameExtractor, Session, WiError, set_log_hook};

const LOG_MAX_LINES: usize = 300;
const LOG_LINE_MAX: usize = 600;

const COLOR_BG: Color = Color::new(25, 25, 25, 255);
const COLOR_BTN: Color = Color::new(40, 90, 170, 255);
const COLOR_BTN_HOVER: Color = Color::new(70, 120, 200, 255);
const COLOR_BTN_DISABLED: Color = Color::new(60, 60, 60, 255);
const COLOR_LOG_BG: Color = Color::new(18, 18, 18, 255);
const COLOR_LOG_TEXT: Color = Color::new(210, 210, 210, 255);
const COLOR_HAZARD: Color = Color::new(230, 160, 60, 255);

#[derive(Clone, Copy)]
enum Action {
    Prev,
    Next,
    Delete,
    ReExtract,
    Export,
    OpenOutput,
}

fn push_log_line(buffer: &Arc<Mutex<Vec<String>>>, line: &str) {
    let mut guard = buffer.lock().unwrap_or_else(|e| e.into_inner());
    if guard.len() >= LOG_MAX_LINES {
        let excess = guard.len() + 1 - LOG_MAX_LINES;
        guard.drain(0..excess);
    }
    let mut text = line.to_string();
    if text.len() > LOG_LINE_MAX {
        let mut cut = LOG_LINE_MAX;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    guard.push(text);
}

fn snapshot_logs(buffer: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    buffer.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

fn draw_button(
    d: &mut RaylibDrawHandle,
    rect: Rectangle,
    label: &str,
    enabled: bool,
    font_size: f32,
) -> bool {
    let mouse = d.get_mouse_position();
    let hot = rect.check_collision_point_rec(mouse);

    let bg = if !enabled {
        COLOR_BTN_DISABLED
    } else if hot {
        COLOR_BTN_HOVER
    } else {
        COLOR_BTN
    };

    d.draw_rectangle_rounded(rect, 0.25, 10, bg);
    d.draw_rectangle_rounded_lines(rect, 0.25, 10, Color::new(20, 20, 20, 255));

    let ts = d.measure_text(label, font_size as i32);
    let pos_x = rect.x + (rect.width - ts as f32) * 0.5;
    let pos_y = rect.y + (rect.height - font_size) * 0.5;
    d.draw_text(label, pos_x as i32, pos_y as i32, font_size as i32, Color::RAYWHITE);

    enabled && hot && d.is_mouse_button_released(MouseButton::MOUSE_BUTTON_LEFT)
}

fn draw_log_panel(d: &mut RaylibDrawHandle, rect: Rectangle, lines: &[String]) {
    d.draw_rectangle_rec(rect, COLOR_LOG_BG);
    d.draw_rectangle_lines_ex(rect, 2.0, Color::new(40, 40, 40, 255));

    let font_size = 14;
    let pad = 8.0;
    let line_h = 16.0;
    let max_lines = ((rect.height - 2.0 * pad) / line_h).floor().max(1.0) as usize;
    let start = lines.len().saturating_sub(max_lines);

    let mut y = rect.y + pad;
    for line in lines.iter().skip(start) {
        d.draw_text(line, (rect.x + pad) as i32, y as i32, font_size, COLOR_LOG_TEXT);
        y += line_h;
    }
}

/// Fits the frame inside `rect` keeping its aspect ratio.
fn draw_frame(d: &mut RaylibDrawHandle, rect: Rectangle, texture: Option<&Texture2D>) {
    d.draw_rectangle_rec(rect, Color::BLACK);
    let Some(texture) = texture else {
        d.draw_text(
            "No frame",
            (rect.x + rect.width * 0.5 - 40.0) as i32,
            (rect.y + rect.height * 0.5 - 10.0) as i32,
            20,
            Color::GRAY,
        );
        return;
    };

    let (w, h) = (texture.width as f32, texture.height as f32);
    if w <= 0.0 || h <= 0.0 {
        return;
    }
    let scale = (rect.width / w).min(rect.height / h);
    let pos = Vector2::new(
        rect.x + (rect.width - w * scale) * 0.5,
        rect.y + (rect.height - h * scale) * 0.5,
    );
    d.draw_texture_ex(texture, pos, 0.0, scale, Color::WHITE);
}

struct FrameCache {
    path: Option<PathBuf>,
    texture: Option<Texture2D>,
}

impl FrameCache {
    fn invalidate(&mut self) {
        self.path = None;
        self.texture = None;
    }

    /// Reloads the texture when the selected frame changed on disk or in the registry.
    fn sync(&mut self, rl: &mut RaylibHandle, thread: &RaylibThread, wanted: Option<&Path>) {
        if self.path.as_deref() == wanted && (wanted.is_none() || self.texture.is_some()) {
            return;
        }
        self.texture = None;
        self.path = wanted.map(Path::to_path_buf);
        let Some(path) = wanted else {
            return;
        };
        let Some(path_str) = path.to_str() else {
            return;
        };
        match rl.load_texture(thread, path_str) {
            Ok(texture) => self.texture = Some(texture),
            Err(err) => eprintln!("[WARNING] Could not load {}: {}", path.display(), err),
        }
    }
}

fn usage() -> ! {
    eprintln!("usage: video-wi <video.mp4> <draft.md> [config.json]");
    std::process::exit(2);
}

fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        usage();
    }
    let video = PathBuf::from(&args[0]);
    let draft_path = PathBuf::from(&args[1]);
    let config_path = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"));

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("[ERROR] Failed to create async runtime: {}", err);
            std::process::exit(1);
        }
    };

    let log_buffer: Arc<Mutex<Vec<String>>> =
        Arc::new(Mutex::new(Vec::with_capacity(LOG_MAX_LINES)));
    let hook_buffer = Arc::clone(&log_buffer);
    set_log_hook(Some(Arc::new(Mutex::new(move |line: &str| {
        push_log_line(&hook_buffer, line);
    }))));

    let prepared = rt.block_on(async {
        init::ensure_directories().await?;
        let cfg = Config::load_or_default(&config_path).await?;
        if !init::check_ffmpeg(&cfg.ffmpeg_bin).await {
            eprintln!("[WARNING] FFmpeg not found. Please install FFmpeg or set ffmpeg_bin.");
        }
        let draft = tokio::fs::read_to_string(&draft_path).await?;
        let mut session = Session::create(&video)?;
        match session.load_draft(draft) {
            Ok(_) | Err(WiError::NoMarkersFound) => {}
            Err(err) => return Err(err.into()),
        }
        let extractor = pipeline::frame_extractor(&cfg);
        session.probe_video(&cfg.ffprobe_bin).await;
        session
            .extract_frames(Arc::clone(&extractor), cfg.extraction_concurrency)
            .await;
        anyhow::Ok((cfg, session, extractor))
    });

    let (cfg, mut session, extractor): (Config, Session, Arc<dyn FrameExtractor>) = match prepared {
        Ok(parts) => parts,
        Err(err) => {
            eprintln!("[ERROR] {:#}", err);
            std::process::exit(1);
        }
    };

    let out_docx = PathBuf::from(init::OUTPUT_DIR).join(format!(
        "{}.docx",
        video
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "work_instructions".to_string())
    ));

    let (mut rl, thread) = raylib::init()
        .size(1180, 720)
        .resizable()
        .title("Work Instruction Review")
        .build();
    rl.set_target_fps(60);

    let mut frames = FrameCache {
        path: None,
        texture: None,
    };

    while !rl.window_should_close() {
        let mut action = None;
        if rl.is_key_pressed(KeyboardKey::KEY_LEFT) {
            action = Some(Action::Prev);
        } else if rl.is_key_pressed(KeyboardKey::KEY_RIGHT) {
            action = Some(Action::Next);
        } else if rl.is_key_pressed(KeyboardKey::KEY_DELETE) {
            action = Some(Action::Delete);
        }

        let registry = session.registry();
        let cursor = registry.cursor();
        let wanted = registry.current().and_then(|s| s.image().map(Path::to_path_buf));
        frames.sync(&mut rl, &thread, wanted.as_deref());

        let registry = session.registry();
        let has_step = cursor.is_some();
        let header = match cursor {
            Some(i) => format!("Step {} of {}", i + 1, registry.len()),
            None => "No steps".to_string(),
        };

        let mut d = rl.begin_drawing(&thread);
        d.clear_background(COLOR_BG);

        d.draw_text(&header, 30, 20, 24, Color::RAYWHITE);
        draw_frame(&mut d, Rectangle::new(30.0, 60.0, 720.0, 405.0), frames.texture.as_ref());

        if let Some(step) = registry.current() {
            d.draw_text(&format!("[{}]", step.timestamp), 30, 480, 20, Color::RAYWHITE);
            d.draw_text(&step.label_text, 130, 480, 20, Color::new(220, 220, 220, 255));
            if let Some(hazard) = &step.hazard_text {
                d.draw_text(&format!("Hazard: {}", hazard), 30, 506, 18, COLOR_HAZARD);
            }
            if !step.details.is_empty() {
                let details = step.details.join("   ");
                d.draw_text(&details, 30, 528, 14, COLOR_LOG_TEXT);
            }
        }

        let buttons = [
            (Action::Prev, "< Prev", has_step),
            (Action::Next, "Next >", has_step),
            (Action::Delete, "Delete", has_step),
            (Action::ReExtract, "Re-extract", has_step),
        ];
        for (i, (act, label, enabled)) in buttons.into_iter().enumerate() {
            let rect = Rectangle::new(30.0 + i as f32 * 180.0, 550.0, 170.0, 44.0);
            if draw_button(&mut d, rect, label, enabled, 18.0) {
                action = Some(act);
            }
        }
        let export_rect = Rectangle::new(30.0, 610.0, 350.0, 60.0);
        if draw_button(&mut d, export_rect, "EXPORT DOCX", true, 22.0) {
            action = Some(Action::Export);
        }
        let folder_rect = Rectangle::new(400.0, 610.0, 350.0, 60.0);
        if draw_button(&mut d, folder_rect, "Open Output Folder", true, 18.0) {
            action = Some(Action::OpenOutput);
        }

        d.draw_text("Log", 780, 20, 24, Color::RAYWHITE);
        let lines = snapshot_logs(&log_buffer);
        draw_log_panel(&mut d, Rectangle::new(780.0, 60.0, 380.0, 640.0), &lines);
        drop(d);

        let Some(action) = action else {
            continue;
        };
        let result = match action {
            Action::Prev => {
                session.registry_mut().move_cursor(-1);
                Ok(())
            }
            Action::Next => {
                session.registry_mut().move_cursor(1);
                Ok(())
            }
            Action::Delete => match cursor {
                Some(i) => {
                    frames.invalidate();
                    session.delete_step(i).map_err(anyhow::Error::from)
                }
                None => Ok(()),
            },
            Action::ReExtract => match cursor {
                Some(i) => {
                    frames.invalidate();
                    rt.block_on(session.re_extract(i, extractor.as_ref()))
                        .map(|_| ())
                        .map_err(anyhow::Error::from)
                }
                None => Ok(()),
            },
            Action::Export => rt
                .block_on(pipeline::write_document(&cfg, &session, &out_docx))
                .map(|_| ()),
            Action::OpenOutput => {
                platform::open_folder(init::OUTPUT_DIR);
                Ok(())
            }
        };
        if let Err(err) = result {
            push_log_line(&log_buffer, &format!("[ERROR] {:#}", err));
        }
    }

    set_log_hook(None);
}
