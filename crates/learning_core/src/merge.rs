//! Pure Document Model updates shared by every path that writes module
//! content: first-module generation, background prefetch, direct loads and
//! on-demand enrichment.

use shared::domain::{ContentBlock, ImageRef, Module, Slide};

/// Combines freshly generated slides with what the module currently holds.
///
/// The outline fixes the slide count: surplus incoming slides are dropped and
/// slides the payload does not cover keep their current state. Identity and
/// any attached narration stay with the current slide.
pub fn merge_module_content(current: &Module, incoming: Vec<Slide>) -> Module {
    let mut incoming = incoming.into_iter();
    let slides = current
        .slides
        .iter()
        .map(|slide| match incoming.next() {
            Some(fresh) => Slide {
                id: slide.id.clone(),
                title: if fresh.title.trim().is_empty() {
                    slide.title.clone()
                } else {
                    fresh.title
                },
                blocks: merge_blocks(&slide.blocks, fresh.blocks),
                narration: slide.narration.clone().or(fresh.narration),
            },
            None => slide.clone(),
        })
        .collect();

    Module {
        slides,
        loaded: true,
        ..current.clone()
    }
}

/// Incoming blocks win, except that an image block whose current reference
/// is already resolved is kept as-is.
pub fn merge_blocks(current: &[ContentBlock], incoming: Vec<ContentBlock>) -> Vec<ContentBlock> {
    incoming
        .into_iter()
        .enumerate()
        .map(|(index, fresh)| {
            let keep_current = matches!(
                (current.get(index), &fresh),
                (
                    Some(ContentBlock::Image {
                        image_url: ImageRef::Resolved(_),
                        ..
                    }),
                    ContentBlock::Image { .. },
                )
            );
            if keep_current {
                current[index].clone()
            } else {
                fresh
            }
        })
        .collect()
}

/// Sets the image reference of exactly one block. Returns false when the
/// address does not name an image block.
pub fn patch_image(module: &mut Module, slide_index: usize, block_index: usize, url: String) -> bool {
    let Some(block) = module
        .slides
        .get_mut(slide_index)
        .and_then(|slide| slide.blocks.get_mut(block_index))
    else {
        return false;
    };

    match block {
        ContentBlock::Image { image_url, .. } => {
            *image_url = ImageRef::Resolved(url);
            true
        }
        _ => false,
    }
}

pub fn attach_narration(module: &mut Module, audio_refs: Vec<Option<String>>) {
    let mut audio_refs = audio_refs.into_iter();
    for slide in &mut module.slides {
        slide.narration = audio_refs.next().flatten();
    }
    module.narration_ready = true;
}

/// One line per loaded module: `Module "<title>": <slide>, <slide>`.
pub fn prior_modules_context(modules: &[Module]) -> String {
    modules
        .iter()
        .filter(|module| module.loaded)
        .map(|module| {
            let titles: Vec<&str> = module.slides.iter().map(|s| s.title.as_str()).collect();
            format!("Module \"{}\": {}", module.title, titles.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
#[path = "tests/merge_tests.rs"]
mod tests;
