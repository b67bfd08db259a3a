//! Image extraction, storage and card reference reconciliation.
//!
//! ## Naming
//!
//! Extracted PDF images are named `page{N}_img{K}.{ext}` where `N` is the
//! 1-based page number and `K` counts kept images on that page. Given the
//! same document and page set the names never change, so a model that
//! echoes `page3_img0.png` back in its output can be matched reliably.
//!
//! ## Storage
//!
//! The image directory is shared by every session. Stored names are the
//! extracted name prefixed with the session's deck tag and id, so no two
//! sessions ever derive the same file name and no locking is needed. Each
//! file is written through a temp file in the same directory and renamed
//! into place, so readers never see a half-written image.

use crate::error::ForgeError;
use crate::model::NewCardImage;
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// A decoded image object as pdfium hands it over.
pub struct RawImage {
    /// 0-based page index.
    pub page_index: usize,
    /// Position among the page's objects.
    pub object_order: usize,
    pub image: DynamicImage,
}

/// An extracted image ready to be stored and shown to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedImage {
    /// 0-based page index.
    pub page_index: usize,
    /// Index among kept images on the page.
    pub index: usize,
    pub filename: String,
    pub data: Vec<u8>,
    /// File extension, e.g. `png`.
    pub format: String,
    pub width: u32,
    pub height: u32,
}

impl ExtractedImage {
    pub fn media_type(&self) -> &'static str {
        media_type_for(&self.filename)
    }
}

/// Filter decorative images and assign stable filenames.
///
/// An image is dropped only when BOTH dimensions are below `min_size`; a
/// thin but long rule or banner is kept. Images that fail to encode are
/// skipped and logged.
///
/// pdfium hands images back already decoded, so every kept image is
/// re-encoded as PNG: the `{ext}` of `page{N}_img{K}.{ext}` and the
/// `format` field are always `png`.
pub fn select_images(raw: Vec<RawImage>, min_size: u32) -> Vec<ExtractedImage> {
    let mut per_page: BTreeMap<usize, usize> = BTreeMap::new();
    let mut out = Vec::new();

    let mut raw = raw;
    raw.sort_by_key(|r| (r.page_index, r.object_order));

    for item in raw {
        let (width, height) = (item.image.width(), item.image.height());
        if width < min_size && height < min_size {
            debug!(
                "Page {}: skipping {}x{} decorative image",
                item.page_index + 1,
                width,
                height
            );
            continue;
        }

        let data = match encode_png(&item.image) {
            Ok(data) => data,
            Err(e) => {
                warn!("Page {}: could not encode image: {}", item.page_index + 1, e);
                continue;
            }
        };

        let index = per_page.entry(item.page_index).or_insert(0);
        out.push(ExtractedImage {
            page_index: item.page_index,
            index: *index,
            filename: format!("page{}_img{}.png", item.page_index + 1, index),
            data,
            format: "png".to_string(),
            width,
            height,
        });
        *index += 1;
    }
    out
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Images whose page is in `pages`, in extraction order.
pub fn images_for_pages<'a>(images: &'a [ExtractedImage], pages: &[usize]) -> Vec<&'a ExtractedImage> {
    images
        .iter()
        .filter(|img| pages.contains(&img.page_index))
        .collect()
}

/// Media type from a file extension. Unknown extensions fall back to PNG.
pub fn media_type_for(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

/// Namespaced storage name: `{prefix}_{name}` with spaces replaced.
pub fn stored_name(prefix: &str, filename: &str) -> String {
    let base = basename(filename).replace(' ', "_");
    format!("{prefix}_{base}")
}

fn basename(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

// ── Storage ──────────────────────────────────────────────────────────────

/// A file written to the shared image directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    /// Name the model sees and echoes back.
    pub original: String,
    pub stored: String,
    pub media_type: String,
    pub byte_size: u64,
}

/// Original → stored filename map for one generation run.
#[derive(Debug, Clone, Default)]
pub struct ImageCatalog {
    entries: BTreeMap<String, StoredImage>,
}

impl ImageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, image: StoredImage) {
        self.entries.insert(image.original.clone(), image);
    }

    /// The entries whose original names are in `originals`, as a new catalog.
    ///
    /// Cards may only link images that were listed for their own batch.
    pub fn restricted_to<'a>(&self, originals: impl IntoIterator<Item = &'a str>) -> ImageCatalog {
        let mut subset = ImageCatalog::new();
        for name in originals {
            if let Some(img) = self.entries.get(name) {
                subset.insert(img.clone());
            }
        }
        subset
    }

    /// Look up a model-supplied reference: exact name first, then by
    /// basename, since models sometimes echo a path fragment.
    pub fn resolve(&self, reference: &str) -> Option<&StoredImage> {
        let reference = reference.trim();
        if let Some(hit) = self.entries.get(reference) {
            return Some(hit);
        }
        let wanted = basename(reference);
        self.entries
            .values()
            .find(|img| basename(&img.original) == wanted)
    }

    /// Card image rows for every resolvable reference, deduplicated.
    ///
    /// Unresolvable references are logged and dropped; the card itself is
    /// still kept.
    pub fn card_images<'a>(&self, references: impl IntoIterator<Item = &'a str>) -> Vec<NewCardImage> {
        let mut rows: Vec<NewCardImage> = Vec::new();
        for reference in references {
            match self.resolve(reference) {
                Some(img) => {
                    if rows.iter().any(|r| r.stored_filename == img.stored) {
                        continue;
                    }
                    rows.push(NewCardImage {
                        original_filename: reference.trim().to_string(),
                        stored_filename: img.stored.clone(),
                        media_type: img.media_type.clone(),
                        byte_size: img.byte_size,
                    });
                }
                None => debug!("Card references unknown image '{}'", reference),
            }
        }
        rows
    }
}

/// Write `data` to `dir/name` atomically and return its size.
pub fn write_image(dir: &Path, name: &str, data: &[u8]) -> Result<u64, ForgeError> {
    let target = dir.join(name);
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ForgeError::io(dir, e))?;
    tmp.write_all(data).map_err(|e| ForgeError::io(&target, e))?;
    tmp.persist(&target)
        .map_err(|e| ForgeError::io(&target, e.error))?;
    Ok(data.len() as u64)
}

/// Store every extracted PDF image under `prefix` and catalog it.
pub fn store_extracted(
    images: &[ExtractedImage],
    dir: &Path,
    prefix: &str,
) -> Result<ImageCatalog, ForgeError> {
    std::fs::create_dir_all(dir).map_err(|e| ForgeError::io(dir, e))?;
    let mut catalog = ImageCatalog::new();
    for img in images {
        let stored = stored_name(prefix, &img.filename);
        let byte_size = write_image(dir, &stored, &img.data)?;
        debug!("Stored {} ({}x{})", stored, img.width, img.height);
        catalog.insert(StoredImage {
            original: img.filename.clone(),
            stored,
            media_type: img.media_type().to_string(),
            byte_size,
        });
    }
    info!("Stored {} images with prefix '{}'", catalog.len(), prefix);
    Ok(catalog)
}

/// Copy referenced Markdown images into storage under `prefix`.
///
/// Entries are keyed by the reference as written in the document. Two
/// references sharing a basename get a numeric suffix so neither
/// overwrites the other.
pub fn store_files<'a>(
    files: impl IntoIterator<Item = (&'a str, &'a Path)>,
    dir: &Path,
    prefix: &str,
) -> Result<ImageCatalog, ForgeError> {
    std::fs::create_dir_all(dir).map_err(|e| ForgeError::io(dir, e))?;
    let mut catalog = ImageCatalog::new();
    let mut used: Vec<String> = Vec::new();

    for (reference, source) in files {
        let mut stored = stored_name(prefix, reference);
        let mut n = 1;
        while used.contains(&stored) {
            let base = stored_name(prefix, reference);
            stored = match base.rsplit_once('.') {
                Some((stem, ext)) => format!("{stem}_{n}.{ext}"),
                None => format!("{base}_{n}"),
            };
            n += 1;
        }
        let data = std::fs::read(source).map_err(|e| ForgeError::io(source, e))?;
        let byte_size = write_image(dir, &stored, &data)?;
        used.push(stored.clone());
        catalog.insert(StoredImage {
            original: reference.to_string(),
            media_type: media_type_for(reference).to_string(),
            stored,
            byte_size,
        });
    }
    info!("Copied {} images with prefix '{}'", catalog.len(), prefix);
    Ok(catalog)
}

// ── Inline references ────────────────────────────────────────────────────

static RE_IMAGE_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[IMAGE:\s*([^\]]+?)\s*\]").unwrap());

/// Filenames named by `[IMAGE: name]` markers, in order of appearance.
pub fn image_markers(text: &str) -> Vec<String> {
    RE_IMAGE_MARKER
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Every image a generated card refers to: its declared list followed by
/// inline markers in the front and back text, without repeats.
pub fn card_references(front: &str, back: &str, declared: &[String]) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    let markers = image_markers(front).into_iter().chain(image_markers(back));
    for r in declared.iter().cloned().chain(markers) {
        if !refs.contains(&r) {
            refs.push(r);
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn raw(page: usize, order: usize, w: u32, h: u32) -> RawImage {
        RawImage {
            page_index: page,
            object_order: order,
            image: DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([0, 0, 255, 255]))),
        }
    }

    fn catalog(names: &[&str]) -> ImageCatalog {
        let mut c = ImageCatalog::new();
        for n in names {
            c.insert(StoredImage {
                original: n.to_string(),
                stored: stored_name("deck_1", n),
                media_type: media_type_for(n).to_string(),
                byte_size: 10,
            });
        }
        c
    }

    #[test]
    fn test_small_images_dropped_only_when_both_dimensions_small() {
        let images = select_images(
            vec![raw(0, 0, 10, 10), raw(0, 1, 200, 5), raw(0, 2, 60, 60)],
            50,
        );
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].filename, "page1_img0.png");
        assert_eq!(images[1].filename, "page1_img1.png");
        assert_eq!(images[1].width, 60);
    }

    #[test]
    fn test_filenames_are_per_page_and_one_based() {
        let images = select_images(vec![raw(2, 5, 80, 80), raw(0, 1, 80, 80), raw(2, 1, 80, 80)], 50);
        let names: Vec<&str> = images.iter().map(|i| i.filename.as_str()).collect();
        assert_eq!(names, vec!["page1_img0.png", "page3_img0.png", "page3_img1.png"]);
        assert!(images[0].data.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn test_extracted_images_are_always_png() {
        let images = select_images(vec![raw(0, 0, 64, 64), raw(1, 0, 200, 40)], 50);
        for img in &images {
            assert_eq!(img.format, "png");
            assert_eq!(img.media_type(), "image/png");
            assert!(img.filename.ends_with(".png"));
            assert!(img.data.starts_with(&[0x89, b'P', b'N', b'G']));
        }
    }

    #[test]
    fn test_images_for_pages_filters() {
        let images = select_images(vec![raw(0, 0, 80, 80), raw(4, 0, 80, 80)], 50);
        let picked = images_for_pages(&images, &[3, 4]);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].filename, "page5_img0.png");
    }

    #[test]
    fn test_media_types() {
        assert_eq!(media_type_for("a.JPG"), "image/jpeg");
        assert_eq!(media_type_for("a.jpeg"), "image/jpeg");
        assert_eq!(media_type_for("a.webp"), "image/webp");
        assert_eq!(media_type_for("a.gif"), "image/gif");
        assert_eq!(media_type_for("a.bmp"), "image/png");
    }

    #[test]
    fn test_stored_name_is_prefixed_and_flat() {
        assert_eq!(stored_name("Bio_3", "page2_img0.png"), "Bio_3_page2_img0.png");
        assert_eq!(stored_name("Bio_3", "assets/my fig.png"), "Bio_3_my_fig.png");
    }

    #[test]
    fn test_restricted_catalog_drops_other_batches() {
        let c = catalog(&["page2_img0.png", "page12_img0.png"]);
        let batch = c.restricted_to(["page2_img0.png", "missing.png"]);
        assert_eq!(batch.len(), 1);
        assert!(batch.resolve("page12_img0.png").is_none());
        let rows = batch.card_images(["page2_img0.png", "page12_img0.png"]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stored_filename, "deck_1_page2_img0.png");
    }

    #[test]
    fn test_resolve_exact_then_basename() {
        let c = catalog(&["diagram.png", "figs/cell.png"]);
        assert_eq!(c.resolve("diagram.png").unwrap().stored, "deck_1_diagram.png");
        assert_eq!(c.resolve("cell.png").unwrap().original, "figs/cell.png");
        assert_eq!(c.resolve("./img/diagram.png").unwrap().original, "diagram.png");
        assert!(c.resolve("missing.png").is_none());
    }

    #[test]
    fn test_card_images_dedup_and_skip_unknown() {
        let c = catalog(&["diagram.png"]);
        let rows = c.card_images(["diagram.png", "nope.png", "diagram.png"]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stored_filename, "deck_1_diagram.png");
        assert_eq!(rows[0].media_type, "image/png");
    }

    #[test]
    fn test_markers_parsed_from_text() {
        let refs = card_references(
            "What is shown? [IMAGE: diagram.png]",
            "A cell [IMAGE:  figs/cell.png ] and [image: ignored.png]",
            &["diagram.png".to_string()],
        );
        assert_eq!(refs, vec!["diagram.png", "figs/cell.png"]);
    }

    #[test]
    fn test_store_extracted_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let images = select_images(vec![raw(1, 0, 64, 64)], 50);
        let catalog = store_extracted(&images, dir.path(), "Notes_7").unwrap();
        let stored = catalog.resolve("page2_img0.png").unwrap();
        assert_eq!(stored.stored, "Notes_7_page2_img0.png");
        let on_disk = std::fs::metadata(dir.path().join(&stored.stored)).unwrap();
        assert_eq!(on_disk.len(), stored.byte_size);
    }

    #[test]
    fn test_store_files_disambiguates_basename_clash() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("a")).unwrap();
        std::fs::create_dir_all(src.path().join("b")).unwrap();
        let a = src.path().join("a/x.png");
        let b = src.path().join("b/x.png");
        std::fs::write(&a, b"one").unwrap();
        std::fs::write(&b, b"two!").unwrap();

        let out = tempfile::tempdir().unwrap();
        let catalog = store_files(
            [("a/x.png", a.as_path()), ("b/x.png", b.as_path())],
            out.path(),
            "md_2",
        )
        .unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.resolve("a/x.png").unwrap().stored, "md_2_x.png");
        assert_eq!(catalog.resolve("b/x.png").unwrap().stored, "md_2_x_1.png");
        assert_eq!(catalog.resolve("b/x.png").unwrap().byte_size, 4);
    }
}
