use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use common::controller::CameraSide;
use cv::Frame;
use driving::{FrameSource, TemperatureSensor};
use glob::{glob_with, MatchOptions, Pattern};
use parking_lot::Mutex;
use tracing::{info, warn};

struct Replay {
    images: Vec<PathBuf>,
    next: usize,
}

/// Replays recorded frames from a directory per camera, looping forever
pub struct ImageDirectory {
    cameras: [Option<Mutex<Replay>>; 2],
}

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

fn list_images(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let root = dir.to_str().with_context(|| format!("Non UTF-8 path {}", dir.display()))?;

    let options = MatchOptions { case_sensitive: false, ..MatchOptions::new() };
    let mut images = Vec::new();
    for extension in IMAGE_EXTENSIONS {
        let pattern = format!("{}/*.{}", Pattern::escape(root), extension);
        images.extend(glob_with(&pattern, options).context("Bad replay pattern")?.flatten());
    }

    images.sort();
    images.dedup();
    Ok(images)
}

impl ImageDirectory {
    pub fn new(front: Option<&Path>, rear: Option<&Path>) -> anyhow::Result<Self> {
        let open = |side: CameraSide, dir: Option<&Path>| -> anyhow::Result<Option<Mutex<Replay>>> {
            let Some(dir) = dir else {
                return Ok(None);
            };

            let images = list_images(dir)?;
            if images.is_empty() {
                warn!(?side, dir = %dir.display(), "No images to replay");
                return Ok(None);
            }

            info!(?side, dir = %dir.display(), count = images.len(), "Replaying images");
            Ok(Some(Mutex::new(Replay { images, next: 0 })))
        };

        Ok(ImageDirectory {
            cameras: [open(CameraSide::Front, front)?, open(CameraSide::Rear, rear)?],
        })
    }
}

impl FrameSource for ImageDirectory {
    fn next_frame(&self, side: CameraSide) -> Option<Frame> {
        let mut replay = self.cameras[side.index()].as_ref()?.lock();

        let path = replay.images[replay.next].clone();
        let next = (replay.next + 1) % replay.images.len();
        replay.next = next;
        drop(replay);

        match image::open(&path) {
            Ok(image) => Some(Frame::new(image.to_rgb8(), side)),
            Err(err) => {
                warn!(?side, path = %path.display(), "Could not read frame: {}", err);
                None
            }
        }
    }
}

/// Board temperature from a Linux thermal zone, reported in millidegrees
pub struct ThermalZone {
    pub path: PathBuf,
}

impl TemperatureSensor for ThermalZone {
    fn current_temperature(&self) -> Option<f64> {
        let text = fs::read_to_string(&self.path).ok()?;
        let millidegrees: f64 = text.trim().parse().ok()?;
        Some(millidegrees / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::env;

    fn scratch_dir(seed: u64) -> PathBuf {
        let mut rng = StdRng::seed_from_u64(seed);
        let dir = env::temp_dir().join(format!("rowbot-replay-{}", rng.gen::<u64>()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn replays_in_name_order_and_loops() {
        let dir = scratch_dir(1);
        for (name, shade) in [("b.png", 20u8), ("a.png", 10), ("c.png", 30), ("D.PNG", 40)] {
            RgbImage::from_pixel(4, 3, Rgb([shade, 0, 0])).save(dir.join(name)).unwrap();
        }
        fs::write(dir.join("notes.txt"), "not a frame").unwrap();

        let source = ImageDirectory::new(Some(dir.as_path()), None).unwrap();
        let shades: Vec<u8> = (0..5)
            .map(|_| source.next_frame(CameraSide::Front).unwrap().image.get_pixel(0, 0).0[0])
            .collect();
        fs::remove_dir_all(&dir).unwrap();

        // upper case sorts first
        assert_eq!(shades, [40, 10, 20, 30, 40]);
        assert!(source.next_frame(CameraSide::Rear).is_none());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = env::temp_dir().join("rowbot-replay-missing");
        assert!(ImageDirectory::new(None, Some(dir.as_path())).is_err());

        let empty = scratch_dir(3);
        let source = ImageDirectory::new(Some(empty.as_path()), None).unwrap();
        fs::remove_dir_all(&empty).unwrap();
        assert!(source.next_frame(CameraSide::Front).is_none());
    }

    #[test]
    fn reads_thermal_zone() {
        let dir = scratch_dir(2);
        let path = dir.join("temp");
        fs::write(&path, "48312\n").unwrap();

        let sensor = ThermalZone { path };
        assert_eq!(sensor.current_temperature(), Some(48.312));
        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(sensor.current_temperature(), None);
    }
}
