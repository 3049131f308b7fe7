use serde::{Deserialize, Serialize};

/// A unique layer identifier (typically GDS layer number).
pub type LayerId = u32;

/// A technology layer that rules and geometry refer to by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    #[serde(default)]
    pub gds_layer: u16,
    #[serde(default)]
    pub gds_datatype: u16,
    #[serde(default)]
    pub description: String,
}

impl Layer {
    pub fn new(id: LayerId, name: &str, gds_layer: u16, gds_datatype: u16) -> Self {
        Self {
            id,
            name: name.to_string(),
            gds_layer,
            gds_datatype,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.description = desc.to_string();
        self
    }
}

/// A collection of layers representing a technology stack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerStack {
    layers: Vec<Layer>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Add a layer, replacing any layer with the same id.
    pub fn add_layer(&mut self, layer: Layer) {
        match self.layers.iter_mut().find(|l| l.id == layer.id) {
            Some(existing) => *existing = layer,
            None => self.layers.push(layer),
        }
    }

    pub fn get_layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn get_layer_by_name(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn get_layer_by_gds(&self, gds_layer: u16, gds_datatype: u16) -> Option<&Layer> {
        self.layers
            .iter()
            .find(|l| l.gds_layer == gds_layer && l.gds_datatype == gds_datatype)
    }

    /// Layer name for an id, if the id is known.
    pub fn name_of(&self, id: LayerId) -> Option<&str> {
        self.get_layer(id).map(|l| l.name.as_str())
    }

    pub fn all_layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name_and_gds() {
        let mut stack = LayerStack::new();
        stack.add_layer(Layer::new(1, "M1", 68, 20));
        stack.add_layer(Layer::new(2, "VIA1", 68, 44).with_description("m1-m2 cut"));
        assert_eq!(stack.get_layer_by_name("VIA1").unwrap().id, 2);
        assert_eq!(stack.get_layer_by_gds(68, 20).unwrap().name, "M1");
        assert_eq!(stack.name_of(2), Some("VIA1"));
        assert!(stack.get_layer_by_name("M9").is_none());
    }

    #[test]
    fn test_add_layer_replaces_same_id() {
        let mut stack = LayerStack::new();
        stack.add_layer(Layer::new(1, "M1", 68, 20));
        stack.add_layer(Layer::new(1, "MET1", 68, 20));
        assert_eq!(stack.layer_count(), 1);
        assert_eq!(stack.name_of(1), Some("MET1"));
    }
}
