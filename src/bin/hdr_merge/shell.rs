//! Line-oriented interactive front end.
//!
//! Reads commands from stdin and drives a `Session`.  Rendered tiles are
//! composed into an in-memory preview that can be written out as a PNG.

use std::{
    fs::File,
    io::{BufRead, BufWriter, Write},
    path::{Path, PathBuf},
    sync::mpsc::{self, Receiver, RecvTimeoutError},
    time::Duration,
};

use lib::{RenderConfig, RenderEvent, RenderMode, Session, Tile};

const HELP: &str = "\
Commands:
  load PATH...                 add images to the stack
  list                         list the loaded images, brightest first
  remove I                     remove image I
  threshold I LEVEL            clipping threshold of image I (0-255)
  ev I FACTOR                  exposure of image I relative to the darkest
  gamma G                      preview gamma
  viewport X Y W H SCALE       visible region, in preview pixels at SCALE
  include I X Y RADIUS         force image I around source pixel (X, Y)
  exclude I X Y RADIUS         keep image I out around source pixel (X, Y)
  preview PATH                 write the current preview as a PNG
  save PATH                    export the merged HDRI (Radiance .hdr)
  status                       show background job progress
  wait                         wait for background jobs to finish
  help                         show this text
  quit                         exit";

const RENDER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Load(Vec<PathBuf>),
    List,
    Remove(usize),
    Threshold(usize, u8),
    Ev(usize, f32),
    Gamma(f32),
    Viewport {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        scale: usize,
    },
    Include(usize, usize, usize, usize),
    Exclude(usize, usize, usize, usize),
    Preview(PathBuf),
    Save(PathBuf),
    Status,
    Wait,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let name = match words.next() {
        Some(name) => name,
        None => return Ok(None),
    };
    let args: Vec<&str> = words.collect();

    fn arg<T: std::str::FromStr>(args: &[&str], i: usize, what: &str) -> Result<T, String> {
        let text = args.get(i).ok_or_else(|| format!("missing {}", what))?;
        text.parse::<T>()
            .map_err(|_| format!("invalid {} \"{}\"", what, text))
    }
    let expect_args = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(format!("\"{}\" takes {} argument(s), got {}", name, n, args.len()))
        }
    };
    let path = |args: &[&str]| -> Result<PathBuf, String> {
        if args.is_empty() {
            Err("missing path".into())
        } else {
            Ok(PathBuf::from(args.join(" ")))
        }
    };

    let command = match name {
        "load" => {
            if args.is_empty() {
                return Err("missing path".into());
            }
            Command::Load(args.iter().map(PathBuf::from).collect())
        }
        "list" => Command::List,
        "remove" => {
            expect_args(1)?;
            Command::Remove(arg(&args, 0, "image index")?)
        }
        "threshold" => {
            expect_args(2)?;
            Command::Threshold(arg(&args, 0, "image index")?, arg(&args, 1, "level")?)
        }
        "ev" => {
            expect_args(2)?;
            Command::Ev(arg(&args, 0, "image index")?, arg(&args, 1, "exposure")?)
        }
        "gamma" => {
            expect_args(1)?;
            Command::Gamma(arg(&args, 0, "gamma")?)
        }
        "viewport" => {
            expect_args(5)?;
            Command::Viewport {
                x: arg(&args, 0, "x")?,
                y: arg(&args, 1, "y")?,
                width: arg(&args, 2, "width")?,
                height: arg(&args, 3, "height")?,
                scale: arg(&args, 4, "scale")?,
            }
        }
        "include" | "exclude" => {
            expect_args(4)?;
            let i = arg(&args, 0, "image index")?;
            let x = arg(&args, 1, "x")?;
            let y = arg(&args, 2, "y")?;
            let r = arg(&args, 3, "radius")?;
            if name == "include" {
                Command::Include(i, x, y, r)
            } else {
                Command::Exclude(i, x, y, r)
            }
        }
        "preview" => Command::Preview(path(&args)?),
        "save" => Command::Save(path(&args)?),
        "status" => Command::Status,
        "wait" => Command::Wait,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => return Err(format!("unknown command \"{}\"", name)),
    };
    Ok(Some(command))
}

//-------------------------------------------------------------

/// The composed preview image, built up from rendered tiles.
#[derive(Debug, Default)]
struct Preview {
    width: usize,
    height: usize,
    scale: usize,
    pixels: Vec<[u8; 3]>,
}

impl Preview {
    /// Copies a tile into place.  A tile for a different image size or
    /// scale starts the preview over.
    fn apply(&mut self, tile: &Tile) {
        if tile.full_width != self.width
            || tile.full_height != self.height
            || tile.scale != self.scale
        {
            self.width = tile.full_width;
            self.height = tile.full_height;
            self.scale = tile.scale;
            self.pixels = vec![[0; 3]; self.width * self.height];
        }

        let x_end = (tile.x + tile.width).min(self.width);
        let y_end = (tile.y + tile.height).min(self.height);
        if tile.x >= x_end {
            return;
        }
        for y in tile.y..y_end {
            let src = &tile.pixels[((y - tile.y) * tile.width)..][..(x_end - tile.x)];
            self.pixels[(y * self.width + tile.x)..(y * self.width + x_end)].copy_from_slice(src);
        }
    }

    fn save_png(&self, path: &Path) -> Result<(), String> {
        if self.pixels.is_empty() {
            return Err("nothing has been rendered yet".into());
        }
        let file = File::create(path).map_err(|e| e.to_string())?;
        image_fmt::save_png(BufWriter::new(file), &self.pixels, self.width, self.height)
            .map_err(|e| e.to_string())
    }
}

fn is_whole_image(tile: &Tile) -> bool {
    tile.mode == RenderMode::Full
        && tile.x == 0
        && tile.y == 0
        && tile.width == tile.full_width
        && tile.height == tile.full_height
}

//-------------------------------------------------------------

struct Shell {
    session: Session,
    events: Receiver<RenderEvent>,
    preview: Preview,
    scale: usize,
    log_read: usize,
}

pub fn run(config: RenderConfig, inputs: Vec<PathBuf>) {
    let (sender, events) = mpsc::channel();
    let mut shell = Shell {
        session: Session::new(config, sender),
        events: events,
        preview: Preview::default(),
        scale: config.scale,
        log_read: 0,
    };

    if !inputs.is_empty() {
        shell.session.add_image_files(inputs);
    }

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let _ = write!(stdout, "> ");
    let _ = stdout.flush();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("failed to read from stdin: {}", e);
                break;
            }
        };

        let keep_going = match parse_command(&line) {
            Ok(Some(command)) => shell.execute(command),
            Ok(None) => true,
            Err(message) => {
                println!("Error: {}.  Type \"help\" for a list of commands.", message);
                true
            }
        };
        shell.drain_events();
        shell.print_new_log();
        if !keep_going {
            break;
        }
        let _ = write!(stdout, "> ");
        let _ = stdout.flush();
    }

    // Let pending saves finish.
    shell.session.job_queue().wait_idle();
    shell.print_new_log();
}

impl Shell {
    fn execute(&mut self, command: Command) -> bool {
        match command {
            Command::Load(paths) => {
                self.session.add_image_files(paths);
            }
            Command::List => {
                let params = self.session.layer_parameters();
                let infos = self.session.image_infos();
                if infos.is_empty() {
                    println!("No images loaded.");
                }
                for (i, (info, (threshold, relative))) in infos.iter().zip(params).enumerate() {
                    let exposure = info
                        .exposure
                        .map(|e| format!("{:.4}", e))
                        .unwrap_or_else(|| "unknown".into());
                    println!(
                        "{:>3}: {}  {}x{}  exposure {}  relative {:.4}  threshold {}",
                        i, info.filename, info.width, info.height, exposure, relative, threshold
                    );
                }
            }
            Command::Remove(i) => {
                if i < self.session.image_count() {
                    self.session.remove_image(i);
                } else {
                    println!("Error: no image {}.", i);
                }
            }
            Command::Threshold(i, level) => {
                if !self.session.set_threshold(i, level) {
                    println!("Error: no image {}.", i);
                }
            }
            Command::Ev(i, relative) => {
                if !self.session.set_relative_exposure(i, relative) {
                    println!("Error: no image {}, or invalid exposure {}.", i, relative);
                }
            }
            Command::Gamma(gamma) => {
                if !self.session.set_gamma(gamma) {
                    println!("Error: gamma must be positive.");
                }
            }
            Command::Viewport {
                x,
                y,
                width,
                height,
                scale,
            } => {
                if self.session.set_viewport(x, y, width, height, scale) {
                    self.scale = scale;
                } else {
                    println!("Error: scale must be at least 1.");
                }
            }
            Command::Include(i, x, y, r) => {
                if !self.session.include_pixels(i, x, y, r) {
                    println!("Error: no image {}.", i);
                }
            }
            Command::Exclude(i, x, y, r) => {
                if !self.session.exclude_pixels(i, x, y, r) {
                    println!("Error: no image {}.", i);
                }
            }
            Command::Preview(path) => match self.write_preview(&path) {
                Ok(()) => println!("Wrote \"{}\".", path.to_string_lossy()),
                Err(message) => println!("Error: {}.", message),
            },
            Command::Save(path) => {
                self.session.save_hdri(path);
            }
            Command::Status => {
                let queue = self.session.job_queue();
                match queue.progress() {
                    Some((text, ratio)) => println!(
                        "{} ({:.0}%), {} job(s) queued",
                        text,
                        ratio * 100.0,
                        queue.job_count()
                    ),
                    None => println!("Idle."),
                }
                let (completed, abandoned) = self.session.render_thread().pass_counts();
                println!(
                    "Render: {:?}, {} pass(es) completed, {} abandoned",
                    self.session.render_thread().worker_state(),
                    completed,
                    abandoned
                );
            }
            Command::Wait => self.session.job_queue().wait_idle(),
            Command::Help => println!("{}", HELP),
            Command::Quit => return false,
        }
        true
    }

    /// Brings the preview up to date with everything rendered so far.
    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: RenderEvent) -> Option<Tile> {
        match event {
            RenderEvent::Tile(tile) => {
                self.preview.apply(&tile);
                Some(tile)
            }
            RenderEvent::Failed(e) => {
                println!("Render failed: {}", e);
                None
            }
        }
    }

    /// Waits for a complete render with the current parameters, then
    /// writes it out.
    fn write_preview(&mut self, path: &Path) -> Result<(), String> {
        self.session.job_queue().wait_idle();
        if self.session.image_count() == 0 {
            return Err("no images loaded".into());
        }

        self.drain_events();
        self.session.render_thread().request_render();
        loop {
            match self.events.recv_timeout(RENDER_TIMEOUT) {
                Ok(RenderEvent::Failed(e)) => return Err(e.to_string()),
                Ok(event) => {
                    if let Some(tile) = self.handle_event(event) {
                        if is_whole_image(&tile) && tile.scale == self.scale {
                            break;
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Err("timed out waiting for a render".into()),
                Err(RecvTimeoutError::Disconnected) => return Err("the renderer has stopped".into()),
            }
        }

        self.preview.save_png(path)
    }

    fn print_new_log(&mut self) {
        let queue = self.session.job_queue();
        let count = queue.log_count();
        // Newest entries are at the front.
        for i in (0..count.saturating_sub(self.log_read)).rev() {
            let (message, level) = queue.get_log(i);
            println!("[{:?}] {}", level, message);
        }
        self.log_read = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(x: usize, y: usize, width: usize, height: usize, value: u8) -> Tile {
        Tile {
            x: x,
            y: y,
            width: width,
            height: height,
            full_width: 4,
            full_height: 3,
            scale: 1,
            mode: RenderMode::Full,
            pixels: vec![[value; 3]; width * height],
        }
    }

    #[test]
    fn parse_commands() {
        assert_eq!(parse_command("   "), Ok(None));
        assert_eq!(
            parse_command("load a.png b.png"),
            Ok(Some(Command::Load(vec!["a.png".into(), "b.png".into()])))
        );
        assert_eq!(
            parse_command("threshold 1 200"),
            Ok(Some(Command::Threshold(1, 200)))
        );
        assert_eq!(
            parse_command("viewport 0 8 64 32 2"),
            Ok(Some(Command::Viewport {
                x: 0,
                y: 8,
                width: 64,
                height: 32,
                scale: 2
            }))
        );
        assert_eq!(
            parse_command("exclude 0 5 6 3"),
            Ok(Some(Command::Exclude(0, 5, 6, 3)))
        );
        assert_eq!(
            parse_command("save my merge.hdr"),
            Ok(Some(Command::Save("my merge.hdr".into())))
        );
        assert_eq!(parse_command("quit"), Ok(Some(Command::Quit)));
    }

    #[test]
    fn parse_errors() {
        assert!(parse_command("frobnicate").is_err());
        assert!(parse_command("threshold 0 256").is_err());
        assert!(parse_command("threshold 0").is_err());
        assert!(parse_command("include 0 1 2").is_err());
        assert!(parse_command("save").is_err());
        assert!(parse_command("load").is_err());
    }

    #[test]
    fn preview_composes_tiles() {
        let mut preview = Preview::default();
        preview.apply(&tile(0, 0, 4, 3, 10));
        preview.apply(&tile(1, 1, 2, 2, 200));

        assert_eq!(preview.width, 4);
        assert_eq!(preview.height, 3);
        assert_eq!(preview.pixels[0], [10; 3]);
        assert_eq!(preview.pixels[1 * 4 + 1], [200; 3]);
        assert_eq!(preview.pixels[2 * 4 + 2], [200; 3]);
        assert_eq!(preview.pixels[2 * 4 + 3], [10; 3]);
    }

    #[test]
    fn preview_resets_on_scale_change() {
        let mut preview = Preview::default();
        preview.apply(&tile(0, 0, 4, 3, 10));

        let mut small = tile(0, 0, 1, 1, 99);
        small.full_width = 2;
        small.full_height = 2;
        small.scale = 2;
        preview.apply(&small);

        assert_eq!(preview.scale, 2);
        assert_eq!(preview.pixels, vec![[99; 3], [0; 3], [0; 3], [0; 3]]);
    }

    #[test]
    fn whole_image_tiles() {
        assert!(is_whole_image(&tile(0, 0, 4, 3, 0)));
        assert!(!is_whole_image(&tile(1, 0, 3, 3, 0)));
        let mut patch = tile(0, 0, 4, 3, 0);
        patch.mode = RenderMode::Patch;
        assert!(!is_whole_image(&patch));
    }

    #[test]
    fn preview_png_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.png");

        let mut preview = Preview::default();
        assert!(preview.save_png(&path).is_err());
        preview.apply(&tile(0, 0, 4, 3, 77));
        preview.save_png(&path).unwrap();

        let img = image_fmt::load(File::open(&path).unwrap()).unwrap();
        assert_eq!((img.width(), img.height()), (4, 3));
    }
}
