//! Food label catalog aligned with the classifier's output layer

use serde::{Deserialize, Serialize};
use std::fmt;

/// Food categories the classifier was trained on, in output-layer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoodLabel {
    ApplePie,
    Cheesecake,
    ChickenCurry,
    ChickenWings,
    ChocolateCake,
    ChocolateMousse,
    ClubSandwich,
    Donuts,
    FishAndChips,
    FrenchFries,
    FrenchToast,
    FriedRice,
    FrozenYogurt,
    GarlicBread,
    GreekSalad,
    Hamburger,
    HotDog,
    IceCream,
    Lasagna,
    MacaroniAndCheese,
    Omelette,
    Pancakes,
    Pizza,
    Ramen,
    Samosa,
    ShrimpAndGrits,
    SpaghettiCarbonara,
    SpringRolls,
    Steak,
    StrawberryShortcake,
    Sushi,
    Tacos,
    Waffles,
}

impl FoodLabel {
    /// Every label, indexed by the model's output position.
    pub const ALL: [FoodLabel; 33] = [
        FoodLabel::ApplePie,
        FoodLabel::Cheesecake,
        FoodLabel::ChickenCurry,
        FoodLabel::ChickenWings,
        FoodLabel::ChocolateCake,
        FoodLabel::ChocolateMousse,
        FoodLabel::ClubSandwich,
        FoodLabel::Donuts,
        FoodLabel::FishAndChips,
        FoodLabel::FrenchFries,
        FoodLabel::FrenchToast,
        FoodLabel::FriedRice,
        FoodLabel::FrozenYogurt,
        FoodLabel::GarlicBread,
        FoodLabel::GreekSalad,
        FoodLabel::Hamburger,
        FoodLabel::HotDog,
        FoodLabel::IceCream,
        FoodLabel::Lasagna,
        FoodLabel::MacaroniAndCheese,
        FoodLabel::Omelette,
        FoodLabel::Pancakes,
        FoodLabel::Pizza,
        FoodLabel::Ramen,
        FoodLabel::Samosa,
        FoodLabel::ShrimpAndGrits,
        FoodLabel::SpaghettiCarbonara,
        FoodLabel::SpringRolls,
        FoodLabel::Steak,
        FoodLabel::StrawberryShortcake,
        FoodLabel::Sushi,
        FoodLabel::Tacos,
        FoodLabel::Waffles,
    ];

    /// Class name as exported with the model (`snake_case`).
    pub fn class_name(&self) -> &'static str {
        match self {
            FoodLabel::ApplePie => "apple_pie",
            FoodLabel::Cheesecake => "cheesecake",
            FoodLabel::ChickenCurry => "chicken_curry",
            FoodLabel::ChickenWings => "chicken_wings",
            FoodLabel::ChocolateCake => "chocolate_cake",
            FoodLabel::ChocolateMousse => "chocolate_mousse",
            FoodLabel::ClubSandwich => "club_sandwich",
            FoodLabel::Donuts => "donuts",
            FoodLabel::FishAndChips => "fish_and_chips",
            FoodLabel::FrenchFries => "french_fries",
            FoodLabel::FrenchToast => "french_toast",
            FoodLabel::FriedRice => "fried_rice",
            FoodLabel::FrozenYogurt => "frozen_yogurt",
            FoodLabel::GarlicBread => "garlic_bread",
            FoodLabel::GreekSalad => "greek_salad",
            FoodLabel::Hamburger => "hamburger",
            FoodLabel::HotDog => "hot_dog",
            FoodLabel::IceCream => "ice_cream",
            FoodLabel::Lasagna => "lasagna",
            FoodLabel::MacaroniAndCheese => "macaroni_and_cheese",
            FoodLabel::Omelette => "omelette",
            FoodLabel::Pancakes => "pancakes",
            FoodLabel::Pizza => "pizza",
            FoodLabel::Ramen => "ramen",
            FoodLabel::Samosa => "samosa",
            FoodLabel::ShrimpAndGrits => "shrimp_and_grits",
            FoodLabel::SpaghettiCarbonara => "spaghetti_carbonara",
            FoodLabel::SpringRolls => "spring_rolls",
            FoodLabel::Steak => "steak",
            FoodLabel::StrawberryShortcake => "strawberry_shortcake",
            FoodLabel::Sushi => "sushi",
            FoodLabel::Tacos => "tacos",
            FoodLabel::Waffles => "waffles",
        }
    }

    /// Natural-language name, underscores rendered as spaces.
    pub fn display_name(&self) -> String {
        self.class_name().replace('_', " ")
    }
}

impl fmt::Display for FoodLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// Immutable, ordered list of labels. Lookups are bounds-checked.
#[derive(Debug, Clone, Copy)]
pub struct LabelCatalog {
    labels: &'static [FoodLabel],
}

impl LabelCatalog {
    /// Catalog matching the deployed food classifier.
    pub const fn food_classifier() -> Self {
        Self {
            labels: &FoodLabel::ALL,
        }
    }

    /// Number of labels (N). Prediction vectors must have exactly this length.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label at `index`, or `None` when `index >= len()`.
    pub fn get(&self, index: usize) -> Option<FoodLabel> {
        self.labels.get(index).copied()
    }

    /// Output position of `label`.
    pub fn index_of(&self, label: FoodLabel) -> Option<usize> {
        self.labels.iter().position(|&l| l == label)
    }

    /// Resolve a class name such as `"hot_dog"`.
    pub fn find(&self, class_name: &str) -> Option<FoodLabel> {
        self.labels
            .iter()
            .copied()
            .find(|l| l.class_name() == class_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = FoodLabel> + '_ {
        self.labels.iter().copied()
    }
}

impl Default for LabelCatalog {
    fn default() -> Self {
        Self::food_classifier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_order() {
        let catalog = LabelCatalog::food_classifier();
        assert_eq!(catalog.len(), 33);
        assert_eq!(catalog.get(0), Some(FoodLabel::ApplePie));
        assert_eq!(catalog.get(22), Some(FoodLabel::Pizza));
        assert_eq!(catalog.get(32), Some(FoodLabel::Waffles));
    }

    #[test]
    fn test_out_of_range_lookup() {
        let catalog = LabelCatalog::food_classifier();
        assert_eq!(catalog.get(33), None);
        assert_eq!(catalog.get(usize::MAX), None);
    }

    #[test]
    fn test_index_name_bijection() {
        let catalog = LabelCatalog::food_classifier();
        for (i, label) in catalog.iter().enumerate() {
            assert_eq!(catalog.index_of(label), Some(i));
            assert_eq!(catalog.find(label.class_name()), Some(label));
        }
        assert_eq!(catalog.find("pizza_margherita"), None);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(FoodLabel::MacaroniAndCheese.display_name(), "macaroni and cheese");
        assert_eq!(FoodLabel::Pizza.to_string(), "pizza");
    }
}
