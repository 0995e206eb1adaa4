// Deferred render queues for the hybrid update/draw model

use super::value::Value;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Render layer a foreign function draws into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderCategory {
    #[serde(rename = "2d")]
    TwoD,
    #[serde(rename = "3d")]
    ThreeD,
    #[serde(rename = "gui")]
    Gui,
}

impl RenderCategory {
    /// Order in which queues are flushed each frame
    pub const FLUSH_ORDER: [RenderCategory; 3] =
        [RenderCategory::TwoD, RenderCategory::ThreeD, RenderCategory::Gui];
}

impl fmt::Display for RenderCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderCategory::TwoD => write!(f, "2D"),
            RenderCategory::ThreeD => write!(f, "3D"),
            RenderCategory::Gui => write!(f, "GUI"),
        }
    }
}

/// One deferred foreign call
#[derive(Debug, Clone, PartialEq)]
pub struct RenderItem {
    pub name: String,
    pub args: Vec<Value>,
}

/// Classification table plus one queue per category
#[derive(Debug, Clone, Default)]
pub struct RenderQueues {
    categories: FxHashMap<String, RenderCategory>,
    two_d: Vec<RenderItem>,
    three_d: Vec<RenderItem>,
    gui: Vec<RenderItem>,
}

impl RenderQueues {
    pub fn classify(&mut self, name: &str, category: RenderCategory) {
        self.categories.insert(name.to_lowercase(), category);
    }

    pub fn unclassify(&mut self, name: &str) {
        self.categories.remove(&name.to_lowercase());
    }

    /// `name` must already be lowercase
    pub fn category_of(&self, name: &str) -> Option<RenderCategory> {
        self.categories.get(name).copied()
    }

    pub fn classified_count(&self) -> usize {
        self.categories.len()
    }

    pub fn push(&mut self, category: RenderCategory, name: &str, args: Vec<Value>) {
        let item = RenderItem {
            name: name.to_string(),
            args,
        };
        self.queue_mut(category).push(item);
    }

    pub fn queue(&self, category: RenderCategory) -> &[RenderItem] {
        match category {
            RenderCategory::TwoD => &self.two_d,
            RenderCategory::ThreeD => &self.three_d,
            RenderCategory::Gui => &self.gui,
        }
    }

    fn queue_mut(&mut self, category: RenderCategory) -> &mut Vec<RenderItem> {
        match category {
            RenderCategory::TwoD => &mut self.two_d,
            RenderCategory::ThreeD => &mut self.three_d,
            RenderCategory::Gui => &mut self.gui,
        }
    }

    /// Empty every queue, keeping the classification table
    pub fn clear(&mut self) {
        self.two_d.clear();
        self.three_d.clear();
        self.gui.clear();
    }

    pub fn len(&self) -> usize {
        self.two_d.len() + self.three_d.len() + self.gui.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move one category's queued items out, leaving it empty
    pub fn take(&mut self, category: RenderCategory) -> Vec<RenderItem> {
        std::mem::take(self.queue_mut(category))
    }
}

/// Rendering names the standard host bindings classify
pub const STANDARD_2D: &[&str] = &[
    "ClearBackground",
    "Background",
    "BeginMode2D",
    "EndMode2D",
    "DrawPixel",
    "DrawLine",
    "DrawLineEx",
    "DrawCircle",
    "DrawCircleLines",
    "DrawEllipse",
    "DrawRing",
    "DrawRectangle",
    "DrawRectangleLines",
    "DrawRectangleRounded",
    "DrawTriangle",
    "DrawPoly",
    "DrawText",
    "DrawTextEx",
    "DrawTexture",
    "DrawTextureEx",
    "DrawTextureRec",
    "DrawTexturePro",
    "DrawSprite",
    "DrawFPS",
    "rect",
    "circle",
    "sprite",
];

pub const STANDARD_3D: &[&str] = &[
    "BeginMode3D",
    "EndMode3D",
    "DrawGrid",
    "DrawModel",
    "DrawModelEx",
    "DrawModelWires",
    "DrawCube",
    "DrawCubeWires",
    "DrawSphere",
    "DrawSphereWires",
    "DrawPlane",
    "DrawLine3D",
    "DrawCylinder",
    "DrawCapsule",
    "DrawBillboard",
    "DrawMesh",
    "DrawBoundingBox",
    "cube",
];

pub const STANDARD_GUI: &[&str] = &[
    "GuiLabel",
    "GuiButton",
    "GuiCheckBox",
    "GuiSlider",
    "GuiProgressBar",
    "GuiTextBox",
    "GuiDropdownBox",
    "GuiWindowBox",
    "GuiGroupBox",
    "GuiLine",
    "GuiPanel",
    "button",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queues_keep_emission_order() {
        let mut q = RenderQueues::default();
        q.classify("DrawCircle", RenderCategory::TwoD);
        assert_eq!(q.category_of("drawcircle"), Some(RenderCategory::TwoD));
        q.push(RenderCategory::TwoD, "drawcircle", vec![Value::Int(1)]);
        q.push(RenderCategory::TwoD, "drawrectangle", vec![Value::Int(2)]);
        q.push(RenderCategory::Gui, "guilabel", vec![]);
        assert_eq!(q.len(), 3);
        let items = q.take(RenderCategory::TwoD);
        assert_eq!(items[0].name, "drawcircle");
        assert_eq!(items[1].args, vec![Value::Int(2)]);
        assert!(q.queue(RenderCategory::TwoD).is_empty());
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.classified_count(), 1);
    }

    #[test]
    fn test_category_names_in_config() {
        let cat: RenderCategory = serde_json::from_str("\"gui\"").unwrap();
        assert_eq!(cat, RenderCategory::Gui);
        assert_eq!(RenderCategory::FLUSH_ORDER[0], RenderCategory::TwoD);
    }
}
