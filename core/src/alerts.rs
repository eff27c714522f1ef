//! Rule-based health alerts for newly logged foods.
//!
//! [`evaluate`] is pure: it looks only at the food and the already validated
//! profile inputs. Each condition contributes at most one alert; each matched
//! allergen contributes one.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::models::{
    AlertCondition, AlertSeverity, FoodItem, HealthAlert, MedicalCondition, NutritionPreferences,
    UserProfile,
};

pub const DIABETES_SUGAR_THRESHOLD_G: f64 = 10.0;
pub const DEFAULT_CARBS_PER_MEAL_G: f64 = 25.0;
pub const DEFAULT_SODIUM_PER_ITEM_MG: f64 = 500.0;
pub const MIN_SODIUM_PER_ITEM_MG: f64 = 400.0;
pub const KIDNEY_PROTEIN_THRESHOLD_G: f64 = 25.0;
pub const DEFAULT_ALERT_CAPACITY: usize = 100;

const SUGARY_FOODS: &[&str] = &[
    "candy", "chocolate", "soda", "cola", "cake", "cookie", "donut", "doughnut", "ice cream",
    "syrup", "honey", "pastry", "jam", "sweet",
];

const HIGH_SODIUM_FOODS: &[&str] = &[
    "bacon", "ham", "salami", "pepperoni", "sausage", "pickle", "soy sauce", "ramen", "chips",
    "pretzel", "jerky", "canned soup", "instant noodle",
];

const GLUTEN_FOODS: &[&str] = &[
    "wheat", "bread", "pasta", "barley", "rye", "flour", "cracker", "bagel", "croissant", "pizza",
    "noodle", "cereal", "beer", "couscous", "seitan",
];

const KIDNEY_LOAD_FOODS: &[&str] = &[
    "red meat", "steak", "processed meat", "organ meat", "liver", "banana", "potato", "spinach",
    "avocado", "cola",
];

fn matches_lexicon(name: &str, lexicon: &[&str]) -> bool {
    lexicon.iter().any(|word| name.contains(word))
}

fn sodium_threshold(prefs: &NutritionPreferences) -> f64 {
    match prefs.daily_sodium_limit_mg {
        Some(limit) => (limit / 3.0).max(MIN_SODIUM_PER_ITEM_MG),
        None => DEFAULT_SODIUM_PER_ITEM_MG,
    }
}

fn alert(
    condition: AlertCondition,
    severity: AlertSeverity,
    title: &str,
    message: String,
    food: &FoodItem,
) -> HealthAlert {
    HealthAlert {
        id: Uuid::new_v4().to_string(),
        condition,
        title: title.to_string(),
        message,
        severity,
        food_item: food.clone(),
        matched_allergen: None,
    }
}

fn check_condition(
    condition: MedicalCondition,
    food: &FoodItem,
    name: &str,
    prefs: &NutritionPreferences,
) -> Option<HealthAlert> {
    match condition {
        MedicalCondition::Diabetes => {
            let carb_target = prefs
                .carbs_per_meal_target_g
                .unwrap_or(DEFAULT_CARBS_PER_MEAL_G);
            let high_sugar = food
                .sugar_g
                .is_some_and(|s| s >= DIABETES_SUGAR_THRESHOLD_G);
            let high_carb = food.carbs_g >= carb_target;
            (high_sugar || high_carb || matches_lexicon(name, SUGARY_FOODS)).then(|| {
                alert(
                    condition.into(),
                    AlertSeverity::Warning,
                    "Blood sugar",
                    format!(
                        "{} may raise blood sugar ({:.0}g carbs, {}). Consider a smaller portion.",
                        food.name,
                        food.carbs_g,
                        food.sugar_g
                            .map_or_else(|| "sugar unknown".to_string(), |s| format!("{s:.0}g sugar"))
                    ),
                    food,
                )
            })
        }
        MedicalCondition::Hypertension => {
            let threshold = sodium_threshold(prefs);
            let high_sodium = food.sodium_mg.is_some_and(|s| s >= threshold);
            (high_sodium || matches_lexicon(name, HIGH_SODIUM_FOODS)).then(|| {
                alert(
                    condition.into(),
                    AlertSeverity::Warning,
                    "High sodium",
                    format!(
                        "{} is high in sodium (threshold {threshold:.0}mg per item).",
                        food.name
                    ),
                    food,
                )
            })
        }
        MedicalCondition::Celiac => matches_lexicon(name, GLUTEN_FOODS).then(|| {
            alert(
                condition.into(),
                AlertSeverity::Critical,
                "Possible gluten",
                format!("{} likely contains gluten.", food.name),
                food,
            )
        }),
        MedicalCondition::KidneyDisease => {
            let high_protein = food.protein_g >= KIDNEY_PROTEIN_THRESHOLD_G;
            (high_protein || matches_lexicon(name, KIDNEY_LOAD_FOODS)).then(|| {
                alert(
                    condition.into(),
                    AlertSeverity::Warning,
                    "Kidney load",
                    format!(
                        "{} may strain kidney function ({:.0}g protein).",
                        food.name, food.protein_g
                    ),
                    food,
                )
            })
        }
    }
}

/// Every alert `food` triggers against the given conditions and allergens.
///
/// Allergens match case-insensitively anywhere in the food name.
#[must_use]
pub fn evaluate(
    food: &FoodItem,
    conditions: &[MedicalCondition],
    allergies: &[String],
    prefs: &NutritionPreferences,
) -> Vec<HealthAlert> {
    let name = food.name.to_lowercase();
    let mut alerts: Vec<HealthAlert> = Vec::new();
    let mut seen: Vec<MedicalCondition> = Vec::new();

    for &condition in conditions {
        if seen.contains(&condition) {
            continue;
        }
        seen.push(condition);
        alerts.extend(check_condition(condition, food, &name, prefs));
    }

    for allergen in allergies {
        let allergen = allergen.trim().to_lowercase();
        if allergen.is_empty() || !name.contains(allergen.as_str()) {
            continue;
        }
        let mut a = alert(
            AlertCondition::Allergy,
            AlertSeverity::Critical,
            "Allergen detected",
            format!("{} appears to contain {allergen}.", food.name),
            food,
        );
        a.matched_allergen = Some(allergen);
        alerts.push(a);
    }

    alerts
}

#[must_use]
pub fn evaluate_for_profile(food: &FoodItem, profile: &UserProfile) -> Vec<HealthAlert> {
    evaluate(
        food,
        profile.medical_conditions(),
        profile.allergies(),
        profile.nutrition_preferences(),
    )
}

/// Bounded FIFO of alerts awaiting the user's attention.
///
/// When full, the oldest alert is dropped to make room.
#[derive(Debug, Clone)]
pub struct AlertQueue {
    capacity: usize,
    items: VecDeque<HealthAlert>,
}

impl AlertQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity.min(DEFAULT_ALERT_CAPACITY)),
        }
    }

    pub fn push_all(&mut self, alerts: impl IntoIterator<Item = HealthAlert>) {
        for alert in alerts {
            if self.items.len() == self.capacity {
                self.items.pop_front();
            }
            self.items.push_back(alert);
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<HealthAlert> {
        self.items.iter().cloned().collect()
    }

    pub fn drain(&mut self) -> Vec<HealthAlert> {
        self.items.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Default for AlertQueue {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_CAPACITY)
    }
}
