use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::mpsc,
    time::Duration,
};

use approx::assert_relative_eq;

use lib::{
    job_helpers::load_image, render_thread::threshold_from_level, ExposureLayer, ExposureStack,
    RenderConfig, RenderEvent, RenderThread, Session,
};

fn write_png(dir: &Path, name: &str, value: u8, width: usize, height: usize) -> PathBuf {
    let path = dir.join(name);
    let pixels = vec![[value; 3]; width * height];
    image_fmt::save_png(File::create(&path).unwrap(), &pixels, width, height).unwrap();
    path
}

fn read_back(path: &Path) -> hdr::HdrImage {
    hdr::read_hdr(&mut BufReader::new(File::open(path).unwrap())).unwrap()
}

#[test]
fn files_to_hdri() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = [
        write_png(dir.path(), "mid.png", 100, 6, 4),
        write_png(dir.path(), "dark.png", 25, 6, 4),
        write_png(dir.path(), "bright.png", 250, 6, 4),
    ];

    let mut stack = ExposureStack::new();
    for path in inputs.iter() {
        stack.push(load_image(path).unwrap()).unwrap();
    }
    stack.sort();

    let order: Vec<_> = stack.layers().iter().map(|l| l.info.filename.clone()).collect();
    assert_eq!(order, vec!["bright.png", "mid.png", "dark.png"]);
    assert_relative_eq!(stack.layer(0).relative_exposure(), 0.1, max_relative = 1.0e-5);
    assert_relative_eq!(stack.layer(1).relative_exposure(), 0.25, max_relative = 1.0e-5);
    assert_eq!(stack.layer(2).relative_exposure(), 1.0);

    let out = dir.path().join("merged.hdr");
    stack.save_hdr(&out).unwrap();

    let img = read_back(&out);
    assert_eq!((img.width, img.height), (6, 4));
    for p in img.pixels.iter() {
        for &c in p.iter() {
            // 250 * 257 * 0.1
            assert_relative_eq!(c, 6425.0, max_relative = 0.01);
        }
    }
}

#[test]
fn session_edits_reach_the_export() {
    let dir = tempfile::tempdir().unwrap();
    let bright = write_png(dir.path(), "bright.png", 250, 4, 4);
    let dark = write_png(dir.path(), "dark.png", 50, 4, 4);

    let (tx, _rx) = mpsc::channel::<RenderEvent>();
    let session = Session::new(RenderConfig::default(), tx);
    session.add_image_files(vec![dark, bright]);
    session.job_queue().wait_idle();
    assert_eq!(session.image_count(), 2);

    // Clip the bright layer everywhere, except where it's painted back in.
    assert!(session.set_relative_exposure(0, 0.5));
    assert!(session.set_threshold(0, 200));
    assert!(session.include_pixels(0, 0, 0, 1));

    let out = dir.path().join("ghost.hdr");
    session.save_hdri(out.clone());
    session.job_queue().wait_idle();

    let img = read_back(&out);
    let at = |x: usize, y: usize| img.pixels[y * img.width + x][0];
    assert_relative_eq!(at(0, 0), 250.0 * 257.0 * 0.5, max_relative = 0.01);
    assert_relative_eq!(at(1, 0), 250.0 * 257.0 * 0.5, max_relative = 0.01);
    assert_relative_eq!(at(0, 1), 250.0 * 257.0 * 0.5, max_relative = 0.01);
    assert_relative_eq!(at(1, 1), 50.0 * 257.0, max_relative = 0.01);
    assert_relative_eq!(at(3, 3), 50.0 * 257.0, max_relative = 0.01);
}

#[test]
fn preview_is_gamma_mapped_export_is_linear() {
    let mut stack = ExposureStack::new();
    let mut layer = ExposureLayer::new(vec![[32768; 3]; 9], 3, 3);
    layer.set_threshold(threshold_from_level(255));
    stack.push(layer).unwrap();
    let linear = stack.merged_pixel(1, 1);

    let (tx, rx) = mpsc::channel();
    let render = RenderThread::new(stack, 2.0, tx);
    let tile = loop {
        match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
            RenderEvent::Tile(tile) if tile.width == 3 && tile.height == 3 => break tile,
            RenderEvent::Tile(_) => {}
            RenderEvent::Failed(e) => panic!("render failed: {}", e),
        }
    };

    assert_eq!(linear, [32768.0; 3]);
    // sqrt(0.5) * 256 = 181.02
    assert_eq!(tile.pixel(1, 1), [181; 3]);
    drop(render);
}
