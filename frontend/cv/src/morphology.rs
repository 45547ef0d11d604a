//! Binary morphology on 0/255 masks with rectangular kernels.
//!
//! Dilation anchors the kernel at `size / 2`. Erosion anchors it at the
//! reflected position, so closing stays extensive and opening stays
//! anti-extensive for even kernel sizes too. Pixels outside the frame never
//! take part.

use image::{GrayImage, Luma};
use imageproc::morphology::{grayscale_dilate, grayscale_erode, Mask};

use crate::settings::MAX_KERNEL;

/// Height of the column kernel used to bridge vertical gaps
pub const VERTICAL_KERNEL: u32 = 5;

fn rectangle(width: u32, height: u32, anchor_x: u32, anchor_y: u32) -> Mask {
    let kernel = GrayImage::from_pixel(width, height, Luma([255]));
    Mask::from_image(&kernel, anchor_x as u8, anchor_y as u8)
}

fn dilation_mask(size: u32) -> Mask {
    let size = size.min(MAX_KERNEL);
    rectangle(size, size, size / 2, size / 2)
}

fn erosion_mask(size: u32) -> Mask {
    let size = size.min(MAX_KERNEL);
    let anchor = size - 1 - size / 2;
    rectangle(size, size, anchor, anchor)
}

pub fn dilate(mask: &GrayImage, size: u32) -> GrayImage {
    if size <= 1 {
        return mask.clone();
    }
    grayscale_dilate(mask, &dilation_mask(size))
}

pub fn erode(mask: &GrayImage, size: u32) -> GrayImage {
    if size <= 1 {
        return mask.clone();
    }
    grayscale_erode(mask, &erosion_mask(size))
}

/// Dilate then erode, fills gaps narrower than the kernel. Size 0 disables.
pub fn close(mask: &GrayImage, size: u32) -> GrayImage {
    if size <= 1 {
        return mask.clone();
    }
    erode(&dilate(mask, size), size)
}

/// Erode then dilate, removes specks smaller than the kernel. Size 0 disables.
pub fn open(mask: &GrayImage, size: u32) -> GrayImage {
    if size <= 1 {
        return mask.clone();
    }
    dilate(&erode(mask, size), size)
}

/// Grows the mask along the columns only, joining row segments that are
/// broken vertically
pub fn dilate_vertical(mask: &GrayImage, iterations: u32) -> GrayImage {
    if iterations == 0 {
        return mask.clone();
    }

    let column = rectangle(1, VERTICAL_KERNEL, 0, VERTICAL_KERNEL / 2);
    let mut out = grayscale_dilate(mask, &column);
    for _ in 1..iterations {
        out = grayscale_dilate(&out, &column);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from(rows: &[&str]) -> GrayImage {
        let height = rows.len() as u32;
        let width = rows[0].len() as u32;
        GrayImage::from_fn(width, height, |x, y| {
            Luma([if rows[y as usize].as_bytes()[x as usize] == b'#' { 255 } else { 0 }])
        })
    }

    fn count(mask: &GrayImage) -> usize {
        mask.pixels().filter(|p| p.0[0] > 0).count()
    }

    fn contains(outer: &GrayImage, inner: &GrayImage) -> bool {
        outer.pixels().zip(inner.pixels()).all(|(o, i)| i.0[0] == 0 || o.0[0] > 0)
    }

    #[test]
    fn close_fills_small_gap() {
        let mask = mask_from(&[
            "........",
            ".###.##.",
            "........",
        ]);
        let closed = close(&mask, 2);
        assert_eq!(closed.get_pixel(4, 1).0[0], 255);
        assert!(contains(&closed, &mask));
    }

    #[test]
    fn open_removes_specks() {
        let mask = mask_from(&[
            "#.......",
            "....####",
            "....####",
            "....####",
        ]);
        let opened = open(&mask, 3);
        assert_eq!(opened.get_pixel(0, 0).0[0], 0);
        assert!(contains(&mask, &opened));
        assert_eq!(count(&opened), 12);
    }

    #[test]
    fn even_kernel_closing_is_extensive() {
        let mask = mask_from(&[
            "..##....#.",
            "..##....#.",
            "..##......",
            "......#...",
        ]);
        for size in 2..6 {
            assert!(contains(&close(&mask, size), &mask), "size {}", size);
            assert!(contains(&mask, &open(&mask, size)), "size {}", size);
        }
    }

    #[test]
    fn dilate_anchors_at_half_size() {
        let mut mask = GrayImage::new(8, 8);
        mask.put_pixel(3, 3, Luma([255]));

        let dilated = dilate(&mask, 2);
        let lit: Vec<(u32, u32)> = dilated
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[0] > 0)
            .map(|(x, y, _)| (x, y))
            .collect();
        assert_eq!(lit, vec![(3, 3), (4, 3), (3, 4), (4, 4)]);

        // the reflected erosion window brings it back
        assert_eq!(erode(&dilated, 2), mask);
    }

    #[test]
    fn zero_kernel_is_identity() {
        let mask = mask_from(&["#.#", ".#.", "#.#"]);
        assert_eq!(close(&mask, 0), mask);
        assert_eq!(open(&mask, 0), mask);
        assert_eq!(dilate_vertical(&mask, 0), mask);
    }

    #[test]
    fn vertical_dilation_bridges_rows_only() {
        let mask = mask_from(&[
            "..#..",
            "..#..",
            ".....",
            ".....",
            "..#..",
            "..#..",
        ]);
        let dilated = dilate_vertical(&mask, 1);
        for y in 0..6 {
            assert_eq!(dilated.get_pixel(2, y).0[0], 255);
            assert_eq!(dilated.get_pixel(1, y).0[0], 0);
            assert_eq!(dilated.get_pixel(3, y).0[0], 0);
        }
    }
}
