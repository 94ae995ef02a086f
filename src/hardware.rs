//! Hardware requirements, edge capacities, and the feasibility filter.

use std::fmt;
use std::str::FromStr;

use log::debug;

use crate::bitset::FeatureSet;
use crate::calculator::PartialConfiguration;
use crate::error::ModelError;
use crate::model::FeatureModel;

/// Hardware resource classes in canonical checking order.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum HardwareClass {
    Display,
    Processor,
    Memory,
    Network,
    Tensor,
    Neural,
    Storage,
    Price,
    Energy,
    Camera,
    Microphone,
    Sensor,
    Ble,
    Wifi,
}

impl HardwareClass {
    pub const COUNT: usize = 14;

    /// All classes, in the order the filter checks them.
    pub const ALL: [HardwareClass; Self::COUNT] = [
        HardwareClass::Display,
        HardwareClass::Processor,
        HardwareClass::Memory,
        HardwareClass::Network,
        HardwareClass::Tensor,
        HardwareClass::Neural,
        HardwareClass::Storage,
        HardwareClass::Price,
        HardwareClass::Energy,
        HardwareClass::Camera,
        HardwareClass::Microphone,
        HardwareClass::Sensor,
        HardwareClass::Ble,
        HardwareClass::Wifi,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            HardwareClass::Display => "DISPLAY",
            HardwareClass::Processor => "PROCESSOR",
            HardwareClass::Memory => "MEMORY",
            HardwareClass::Network => "NETWORK",
            HardwareClass::Tensor => "TENSOR",
            HardwareClass::Neural => "NEURAL",
            HardwareClass::Storage => "STORAGE",
            HardwareClass::Price => "PRICE",
            HardwareClass::Energy => "ENERGY",
            HardwareClass::Camera => "CAMERA",
            HardwareClass::Microphone => "MICROPHONE",
            HardwareClass::Sensor => "SENSOR",
            HardwareClass::Ble => "BLE",
            HardwareClass::Wifi => "WIFI",
        }
    }
}

impl fmt::Display for HardwareClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HardwareClass {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HardwareClass::ALL
            .into_iter()
            .find(|class| class.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ModelError::UnknownHardwareClass(s.to_string()))
    }
}

/// One integer amount per hardware class. Missing entries are 0.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct HardwareVector([u32; HardwareClass::COUNT]);

impl HardwareVector {
    pub fn uniform(amount: u32) -> Self {
        HardwareVector([amount; HardwareClass::COUNT])
    }

    pub fn get(&self, class: HardwareClass) -> u32 {
        self.0[class.index()]
    }

    pub fn set(&mut self, class: HardwareClass, amount: u32) {
        self.0[class.index()] = amount;
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&a| a == 0)
    }

    /// First class among the first `classes` classes whose amount exceeds `capacity`.
    pub fn first_exceeding(&self, capacity: &HardwareVector, classes: usize) -> Option<HardwareClass> {
        HardwareClass::ALL
            .into_iter()
            .take(classes)
            .find(|&class| self.get(class) > capacity.get(class))
    }

    /// True if no requirement among the first `classes` classes exceeds `capacity`.
    pub fn fits_within(&self, capacity: &HardwareVector, classes: usize) -> bool {
        self.first_exceeding(capacity, classes).is_none()
    }
}

/// Resource capacities of one edge node.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct AvailableEdgeHardware {
    capacity: HardwareVector,
}

impl AvailableEdgeHardware {
    /// Every class gets the same capacity.
    pub fn uniform(amount: u32) -> Self {
        AvailableEdgeHardware {
            capacity: HardwareVector::uniform(amount),
        }
    }

    pub fn with(mut self, class: HardwareClass, amount: u32) -> Self {
        self.capacity.set(class, amount);
        self
    }

    pub fn get(&self, class: HardwareClass) -> u32 {
        self.capacity.get(class)
    }

    pub fn capacity(&self) -> &HardwareVector {
        &self.capacity
    }
}

/// Collects the features whose requirements exceed `edge` in any of the first `classes` classes.
pub fn non_available_features(model: &FeatureModel, edge: &AvailableEdgeHardware, classes: usize) -> FeatureSet {
    let mut result = FeatureSet::with_capacity(model.len());
    for (id, feature) in model.iter() {
        if let Some(class) = feature.hardware().first_exceeding(edge.capacity(), classes) {
            debug!(
                "feature {} needs {} {} but edge offers {}",
                feature.name(),
                feature.hardware().get(class),
                class,
                edge.get(class)
            );
            result.insert(id);
        }
    }
    result
}

/// Removes non-available features from `configuration` in place.
pub fn strip_non_available(configuration: &mut PartialConfiguration, non_available: &FeatureSet) {
    configuration.features.retain(|&id| !non_available.contains(id));
}
