//! Static story-template catalogue and the slot-type registry.
//!
//! Templates are the only state the server persists: a keyed map of
//! title/slots/story text compiled into the binary.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// Listing entry for the template picker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSummary {
    pub id: String,
    pub title: String,
    pub genre: String,
    pub content_rating: String,
}

/// One typed placeholder in a template story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSlot {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub slot_type: String,
}

/// Full template definition: summary fields plus slots and story text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDefinition {
    pub id: String,
    pub title: String,
    pub genre: String,
    pub content_rating: String,
    pub slots: Vec<TemplateSlot>,
    pub story: String,
}

impl TemplateDefinition {
    pub fn summary(&self) -> TemplateSummary {
        TemplateSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            genre: self.genre.clone(),
            content_rating: self.content_rating.clone(),
        }
    }
}

/// Validation bounds and rendering hints for a slot type.
#[derive(Debug, Clone)]
pub struct SlotType {
    pub name: &'static str,
    pub label: &'static str,
    pub min_length: usize,
    pub max_length: usize,
    /// Wrap the value in double quotes when rendered into the story.
    pub quote_in_story: bool,
}

const SLOT_TYPES: &[SlotType] = &[
    SlotType { name: "adjective", label: "An adjective", min_length: 1, max_length: 24, quote_in_story: false },
    SlotType { name: "name", label: "A person", min_length: 1, max_length: 40, quote_in_story: false },
    SlotType { name: "verb", label: "A verb ending in -ing", min_length: 1, max_length: 30, quote_in_story: false },
    SlotType { name: "place", label: "A place", min_length: 1, max_length: 40, quote_in_story: false },
    SlotType { name: "sound", label: "A silly sound", min_length: 1, max_length: 24, quote_in_story: true },
    SlotType { name: "noun", label: "A noun", min_length: 1, max_length: 40, quote_in_story: false },
];

/// Fallback for slot types outside the registry.
static DEFAULT_SLOT_TYPE: SlotType = SlotType {
    name: "unknown",
    label: "A word or phrase",
    min_length: 1,
    max_length: 60,
    quote_in_story: false,
};

/// Look up a slot type by name, falling back to a permissive default.
pub fn slot_type(name: &str) -> &'static SlotType {
    SLOT_TYPES
        .iter()
        .find(|t| t.name == name)
        .unwrap_or(&DEFAULT_SLOT_TYPE)
}

/// (min, max) value length for a slot type.
pub fn slot_limits(name: &str) -> (usize, usize) {
    let t = slot_type(name);
    (t.min_length, t.max_length)
}

fn base_slots() -> Vec<TemplateSlot> {
    ["adjective", "name", "verb", "place", "sound", "noun"]
        .iter()
        .map(|name| {
            let t = slot_type(name);
            TemplateSlot {
                id: name.to_string(),
                label: t.label.to_string(),
                slot_type: name.to_string(),
            }
        })
        .collect()
}

fn make_template(id: &str, title: &str, genre: &str, story: &str) -> TemplateDefinition {
    TemplateDefinition {
        id: id.to_string(),
        title: title.to_string(),
        genre: genre.to_string(),
        content_rating: "family".to_string(),
        slots: base_slots(),
        story: story.to_string(),
    }
}

static CATALOGUE: LazyLock<Vec<TemplateDefinition>> = LazyLock::new(|| {
    vec![
        make_template(
            "t-forest-mishap",
            "The Forest Mishap",
            "Adventure",
            "On a {adjective} morning, {name} was {verb} through the {place} when a {sound} \
             startled a {noun}. Everyone laughed, then asked for an encore.",
        ),
        make_template(
            "t-space-diner",
            "Midnight at the Space Diner",
            "Sci-Fi",
            "At the {place} space diner, {name} kept {verb} until a {adjective} {noun} burst in \
             with a {sound}. The crowd cheered and ordered dessert.",
        ),
        make_template(
            "t-castle-caper",
            "The Castle Caper",
            "Fantasy",
            "Inside the {adjective} castle, {name} was caught {verb} past the {place} when a \
             {sound} spooked the {noun}. A royal encore was demanded.",
        ),
        make_template(
            "t-museum-heist",
            "The Curious Museum Heist",
            "Mystery",
            "During a {adjective} tour of the {place}, {name} was {verb} when a {sound} echoed \
             over the {noun}. The guide insisted on an encore.",
        ),
        make_template(
            "t-wild-west",
            "Sundown in the Wild West",
            "Western",
            "At the {place} saloon, {name} was {verb} when a {sound} scared a {adjective} herd \
             of {noun}. The town roared for a repeat.",
        ),
        make_template(
            "t-ocean-odyssey",
            "The Ocean Odyssey",
            "Adventure",
            "On the {adjective} deck of the {place}, {name} was {verb} when a {sound} startled \
             the {noun}. The crew begged for an encore.",
        ),
    ]
});

/// All templates, in catalogue order.
pub fn all_templates() -> &'static [TemplateDefinition] {
    &CATALOGUE
}

/// Summaries for the listing endpoint.
pub fn template_summaries() -> Vec<TemplateSummary> {
    CATALOGUE.iter().map(TemplateDefinition::summary).collect()
}

/// Look up a template by id.
pub fn template_definition(id: &str) -> Option<&'static TemplateDefinition> {
    CATALOGUE.iter().find(|t| t.id == id)
}
