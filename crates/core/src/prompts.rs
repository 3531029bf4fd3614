//! Prompt combinatorics.
//!
//! Every prompt is one pick from each component list, rendered as
//! `a <subject>[, <accessory>], <style>, <color>[, <background>], <quality>`.
//! Generation is deterministic; callers shuffle before seeding when they
//! want a random claim order.

use rand::seq::{IndexedRandom, SliceRandom};

use crate::theme::PromptComponents;

/// Placeholder used when an optional list is empty.
static OMITTED: [String; 1] = [String::new()];

fn optional(list: &[String]) -> &[String] {
    if list.is_empty() {
        &OMITTED
    } else {
        list
    }
}

/// Render a single prompt from one pick per component.
///
/// Empty `accessory` or `background` values are left out entirely.
pub fn render_prompt(
    subject: &str,
    accessory: &str,
    style: &str,
    color: &str,
    background: &str,
    quality: &str,
) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(6);
    parts.push(format!("a {subject}"));
    if !accessory.is_empty() {
        parts.push(accessory.to_string());
    }
    parts.push(style.to_string());
    parts.push(color.to_string());
    if !background.is_empty() {
        parts.push(background.to_string());
    }
    parts.push(quality.to_string());
    parts.join(", ")
}

/// Number of prompts [`generate_all`] would produce.
pub fn combination_count(components: &PromptComponents) -> usize {
    components.subjects.len()
        * optional(&components.accessories).len()
        * components.styles.len()
        * components.colors.len()
        * optional(&components.backgrounds).len()
        * components.qualities.len()
}

/// Produce the full cartesian product of the component lists.
pub fn generate_all(components: &PromptComponents) -> Vec<String> {
    let mut prompts = Vec::with_capacity(combination_count(components));

    for subject in &components.subjects {
        for accessory in optional(&components.accessories) {
            for style in &components.styles {
                for color in &components.colors {
                    for background in optional(&components.backgrounds) {
                        for quality in &components.qualities {
                            prompts.push(render_prompt(
                                subject, accessory, style, color, background, quality,
                            ));
                        }
                    }
                }
            }
        }
    }

    prompts
}

/// Shuffle prompts in place with the thread-local RNG.
pub fn shuffle(prompts: &mut [String]) {
    prompts.shuffle(&mut rand::rng());
}

/// Pick up to `n` random prompts without generating the full product.
pub fn sample(components: &PromptComponents, n: usize) -> Vec<String> {
    let mut rng = rand::rng();
    let accessories = optional(&components.accessories);
    let backgrounds = optional(&components.backgrounds);

    (0..n)
        .filter_map(|_| {
            Some(render_prompt(
                components.subjects.choose(&mut rng)?,
                accessories.choose(&mut rng)?,
                components.styles.choose(&mut rng)?,
                components.colors.choose(&mut rng)?,
                backgrounds.choose(&mut rng)?,
                components.qualities.choose(&mut rng)?,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::theme;

    fn small() -> PromptComponents {
        PromptComponents {
            subjects: vec!["cat".into(), "kitten".into()],
            accessories: vec!["with laser eyes".into(), String::new()],
            styles: vec!["anime style".into()],
            colors: vec!["electric blue".into()],
            backgrounds: vec![],
            qualities: vec!["4k".into(), "8k".into()],
        }
    }

    #[test]
    fn render_includes_all_parts() {
        let p = render_prompt(
            "cat",
            "with VR headset",
            "3D render",
            "red and gold",
            "neon city skyline",
            "4k",
        );
        assert_eq!(
            p,
            "a cat, with VR headset, 3D render, red and gold, neon city skyline, 4k"
        );
    }

    #[test]
    fn render_skips_empty_optional_parts() {
        let p = render_prompt("cat", "", "3D render", "red and gold", "", "4k");
        assert_eq!(p, "a cat, 3D render, red and gold, 4k");
    }

    #[test]
    fn generate_all_matches_count_and_is_unique() {
        let components = small();
        let prompts = generate_all(&components);
        assert_eq!(prompts.len(), combination_count(&components));
        assert_eq!(prompts.len(), 8);

        let unique: HashSet<_> = prompts.iter().collect();
        assert_eq!(unique.len(), prompts.len());
    }

    #[test]
    fn empty_optional_list_counts_as_single_omission() {
        let components = small();
        assert!(generate_all(&components)
            .iter()
            .all(|p| !p.contains("background")));
    }

    #[test]
    fn builtin_cats_combination_count() {
        let theme = theme::builtin("cats").unwrap();
        assert_eq!(combination_count(&theme.components), 10 * 16 * 16 * 12 * 13 * 6);
    }

    #[test]
    fn shuffle_preserves_contents() {
        let mut prompts = generate_all(&small());
        let before: HashSet<_> = prompts.iter().cloned().collect();
        shuffle(&mut prompts);
        let after: HashSet<_> = prompts.iter().cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn sample_draws_from_the_product() {
        let components = small();
        let all: HashSet<_> = generate_all(&components).into_iter().collect();
        let picked = sample(&components, 5);
        assert_eq!(picked.len(), 5);
        assert!(picked.iter().all(|p| all.contains(p)));
    }
}
