use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};

pub const DEFAULT_GOAL_CALORIES: f64 = 2000.0;
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Nutrient profile for one serving, as handed over by a food catalog.
///
/// Entries embed a copy, so later catalog edits never rewrite history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodItem {
    pub id: String,
    pub name: String,
    pub calories: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sugar_g: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sodium_mg: Option<f64>,
    #[serde(default)]
    pub serving_size: String,
}

impl FoodItem {
    /// Build a food with only calories and macros set; optional nutrients are empty.
    pub fn new(
        name: impl Into<String>,
        calories: f64,
        protein_g: f64,
        carbs_g: f64,
        fat_g: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            calories,
            protein_g,
            carbs_g,
            fat_g,
            sugar_g: None,
            sodium_mg: None,
            serving_size: "1 serving".to_string(),
        }
    }

    #[must_use]
    pub fn with_sugar(mut self, sugar_g: f64) -> Self {
        self.sugar_g = Some(sugar_g);
        self
    }

    #[must_use]
    pub fn with_sodium(mut self, sodium_mg: f64) -> Self {
        self.sodium_mg = Some(sodium_mg);
        self
    }

    #[must_use]
    pub fn with_serving_size(mut self, serving_size: impl Into<String>) -> Self {
        self.serving_size = serving_size.into();
        self
    }
}

/// Validate a food before it is embedded in the ledger: name must not be empty,
/// nutrients must be finite and non-negative.
pub fn validate_food_item(food: &FoodItem) -> LedgerResult<()> {
    if food.name.trim().is_empty() {
        return Err(LedgerError::validation("Food name must not be empty"));
    }
    let required = [
        ("calories", food.calories),
        ("protein_g", food.protein_g),
        ("carbs_g", food.carbs_g),
        ("fat_g", food.fat_g),
    ];
    let optional = [("sugar_g", food.sugar_g), ("sodium_mg", food.sodium_mg)];
    for (field, value) in required
        .into_iter()
        .chain(optional.into_iter().filter_map(|(f, v)| v.map(|v| (f, v))))
    {
        if !value.is_finite() || value < 0.0 {
            return Err(LedgerError::validation(format!(
                "{field} must be a non-negative number (got {value})"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealType {
    pub const ALL: [MealType; 4] = [
        MealType::Breakfast,
        MealType::Lunch,
        MealType::Dinner,
        MealType::Snack,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
            MealType::Snack => "snack",
        }
    }
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MealType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "breakfast" => Ok(MealType::Breakfast),
            "lunch" => Ok(MealType::Lunch),
            "dinner" => Ok(MealType::Dinner),
            "snack" => Ok(MealType::Snack),
            _ => Err(LedgerError::validation(format!(
                "Invalid meal type '{s}'. Must be one of: breakfast, lunch, dinner, snack"
            ))),
        }
    }
}

/// Calories and macros, summed or per entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NutrientTotals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

impl NutrientTotals {
    /// True when every nutrient is within `tolerance` of `other`.
    #[must_use]
    pub fn approx_eq(&self, other: &NutrientTotals, tolerance: f64) -> bool {
        (self.calories - other.calories).abs() < tolerance
            && (self.protein - other.protein).abs() < tolerance
            && (self.carbs - other.carbs).abs() < tolerance
            && (self.fat - other.fat).abs() < tolerance
    }
}

impl Add for NutrientTotals {
    type Output = NutrientTotals;

    fn add(self, rhs: NutrientTotals) -> NutrientTotals {
        NutrientTotals {
            calories: self.calories + rhs.calories,
            protein: self.protein + rhs.protein,
            carbs: self.carbs + rhs.carbs,
            fat: self.fat + rhs.fat,
        }
    }
}

impl AddAssign for NutrientTotals {
    fn add_assign(&mut self, rhs: NutrientTotals) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for NutrientTotals {
    fn sum<I: Iterator<Item = NutrientTotals>>(iter: I) -> Self {
        iter.fold(NutrientTotals::default(), Add::add)
    }
}

#[must_use]
pub fn new_entry_id() -> String {
    Uuid::new_v4().to_string()
}

/// One logged food occurrence: snapshot × quantity × meal slot × time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealEntry {
    pub id: String,
    pub food_item: FoodItem,
    pub quantity: f64,
    pub meal_type: MealType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl MealEntry {
    pub fn new(
        food_item: FoodItem,
        quantity: f64,
        meal_type: MealType,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_entry_id(),
            food_item,
            quantity,
            meal_type,
            timestamp,
            image_ref: None,
        }
    }

    /// Calories this entry contributes (`food calories × quantity`).
    #[must_use]
    pub fn calories(&self) -> f64 {
        self.food_item.calories * self.quantity
    }

    #[must_use]
    pub fn nutrients(&self) -> NutrientTotals {
        NutrientTotals {
            calories: self.calories(),
            protein: self.food_item.protein_g * self.quantity,
            carbs: self.food_item.carbs_g * self.quantity,
            fat: self.food_item.fat_g * self.quantity,
        }
    }
}

/// All meal entries for one calendar date plus cached totals.
///
/// Totals are a cache over `entries`; every mutation path calls
/// [`DailyRecord::recompute_totals`] before the record is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub entries: Vec<MealEntry>,
    pub total_calories: f64,
    pub total_protein: f64,
    pub total_carbs: f64,
    pub total_fat: f64,
    pub goal_calories: f64,
    pub remaining_calories: f64,
}

impl DailyRecord {
    #[must_use]
    pub fn new(date: NaiveDate, goal_calories: f64) -> Self {
        Self {
            date,
            entries: Vec::new(),
            total_calories: 0.0,
            total_protein: 0.0,
            total_carbs: 0.0,
            total_fat: 0.0,
            goal_calories,
            remaining_calories: goal_calories,
        }
    }

    #[must_use]
    pub fn date_key(&self) -> String {
        date_key(self.date)
    }

    pub fn recompute_totals(&mut self) {
        let totals: NutrientTotals = self.entries.iter().map(MealEntry::nutrients).sum();
        self.total_calories = totals.calories;
        self.total_protein = totals.protein;
        self.total_carbs = totals.carbs;
        self.total_fat = totals.fat;
        self.remaining_calories = self.goal_calories - self.total_calories;
    }

    /// Cached totals as a value.
    #[must_use]
    pub fn totals(&self) -> NutrientTotals {
        NutrientTotals {
            calories: self.total_calories,
            protein: self.total_protein,
            carbs: self.total_carbs,
            fat: self.total_fat,
        }
    }

    pub fn entries_for(&self, meal_type: MealType) -> impl Iterator<Item = &MealEntry> {
        self.entries.iter().filter(move |e| e.meal_type == meal_type)
    }

    #[must_use]
    pub fn meal_totals(&self, meal_type: MealType) -> NutrientTotals {
        self.entries_for(meal_type).map(MealEntry::nutrients).sum()
    }

    /// Calorie subtotal per meal slot, in breakfast → snack order, skipping empty slots.
    #[must_use]
    pub fn calories_by_meal(&self) -> Vec<(MealType, f64)> {
        MealType::ALL
            .iter()
            .filter(|m| self.entries_for(**m).next().is_some())
            .map(|m| (*m, self.meal_totals(*m).calories))
            .collect()
    }

    #[must_use]
    pub fn entry(&self, id: &str) -> Option<&MealEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

#[must_use]
pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date_key(s: &str) -> LedgerResult<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|_| LedgerError::validation(format!("Invalid date '{s}'. Must be YYYY-MM-DD")))
}

/// User-editable weekly goal configuration, stored apart from daily records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeeklyGoalSettings {
    pub enabled: bool,
    pub buffer_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly_target_calories: Option<f64>,
}

pub fn validate_weekly_settings(settings: &WeeklyGoalSettings) -> LedgerResult<()> {
    if let Some(target) = settings.weekly_target_calories {
        if !target.is_finite() || target <= 0.0 {
            return Err(LedgerError::validation(
                "weekly_target_calories must be greater than 0",
            ));
        }
    }
    Ok(())
}

/// Derived view over seven daily records; recomputed, never the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklySummary {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub total_calories: f64,
    pub total_protein: f64,
    pub total_carbs: f64,
    pub total_fat: f64,
    pub goal_calories: f64,
    /// `round(goal − consumed)`: positive is headroom, negative is over budget.
    pub buffer_balance: f64,
    pub buffer_enabled: bool,
    pub days_logged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicalCondition {
    Diabetes,
    Hypertension,
    Celiac,
    KidneyDisease,
}

impl MedicalCondition {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MedicalCondition::Diabetes => "diabetes",
            MedicalCondition::Hypertension => "hypertension",
            MedicalCondition::Celiac => "celiac",
            MedicalCondition::KidneyDisease => "kidney_disease",
        }
    }
}

impl fmt::Display for MedicalCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MedicalCondition {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "diabetes" => Ok(MedicalCondition::Diabetes),
            "hypertension" => Ok(MedicalCondition::Hypertension),
            "celiac" | "coeliac" => Ok(MedicalCondition::Celiac),
            "kidney_disease" => Ok(MedicalCondition::KidneyDisease),
            _ => Err(LedgerError::validation(format!(
                "Unknown medical condition '{s}'. Must be one of: diabetes, hypertension, celiac, kidney_disease"
            ))),
        }
    }
}

/// Optional per-user thresholds consulted by the alert evaluator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NutritionPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs_per_meal_target_g: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_sodium_limit_mg: Option<f64>,
}

/// Unvalidated profile shape as read from config files or request bodies.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawUserProfile {
    pub goal_calories: Option<f64>,
    pub medical_conditions: Vec<String>,
    pub allergies: Vec<String>,
    pub nutrition_preferences: NutritionPreferences,
}

/// Read-only profile inputs to the engine, validated on construction.
///
/// Allergens are trimmed, lower-cased and de-duplicated; conditions are
/// de-duplicated. The alert evaluator relies on these guarantees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawUserProfile")]
pub struct UserProfile {
    goal_calories: f64,
    medical_conditions: Vec<MedicalCondition>,
    allergies: Vec<String>,
    nutrition_preferences: NutritionPreferences,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            goal_calories: DEFAULT_GOAL_CALORIES,
            medical_conditions: Vec::new(),
            allergies: Vec::new(),
            nutrition_preferences: NutritionPreferences::default(),
        }
    }
}

impl UserProfile {
    pub fn new(
        goal_calories: f64,
        medical_conditions: Vec<MedicalCondition>,
        allergies: Vec<String>,
        nutrition_preferences: NutritionPreferences,
    ) -> LedgerResult<Self> {
        if !goal_calories.is_finite() || goal_calories <= 0.0 {
            return Err(LedgerError::validation(
                "goal_calories must be greater than 0",
            ));
        }
        let limits = [
            (
                "carbs_per_meal_target_g",
                nutrition_preferences.carbs_per_meal_target_g,
            ),
            (
                "daily_sodium_limit_mg",
                nutrition_preferences.daily_sodium_limit_mg,
            ),
        ];
        for (field, value) in limits {
            if let Some(v) = value {
                if !v.is_finite() || v <= 0.0 {
                    return Err(LedgerError::validation(format!(
                        "{field} must be greater than 0"
                    )));
                }
            }
        }

        let mut conditions: Vec<MedicalCondition> = Vec::new();
        for c in medical_conditions {
            if !conditions.contains(&c) {
                conditions.push(c);
            }
        }

        let mut normalized: Vec<String> = Vec::new();
        for allergen in allergies {
            let a = allergen.trim().to_lowercase();
            if a.is_empty() {
                return Err(LedgerError::validation("Allergy entries must not be empty"));
            }
            if !normalized.contains(&a) {
                normalized.push(a);
            }
        }

        Ok(Self {
            goal_calories,
            medical_conditions: conditions,
            allergies: normalized,
            nutrition_preferences,
        })
    }

    #[must_use]
    pub fn goal_calories(&self) -> f64 {
        self.goal_calories
    }

    #[must_use]
    pub fn medical_conditions(&self) -> &[MedicalCondition] {
        &self.medical_conditions
    }

    #[must_use]
    pub fn has_condition(&self, condition: MedicalCondition) -> bool {
        self.medical_conditions.contains(&condition)
    }

    #[must_use]
    pub fn allergies(&self) -> &[String] {
        &self.allergies
    }

    #[must_use]
    pub fn nutrition_preferences(&self) -> &NutritionPreferences {
        &self.nutrition_preferences
    }
}

impl TryFrom<RawUserProfile> for UserProfile {
    type Error = LedgerError;

    fn try_from(raw: RawUserProfile) -> Result<Self, Self::Error> {
        let conditions = raw
            .medical_conditions
            .iter()
            .map(|c| c.parse::<MedicalCondition>())
            .collect::<LedgerResult<Vec<_>>>()?;
        UserProfile::new(
            raw.goal_calories.unwrap_or(DEFAULT_GOAL_CALORIES),
            conditions,
            raw.allergies,
            raw.nutrition_preferences,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    Diabetes,
    Hypertension,
    Celiac,
    KidneyDisease,
    Allergy,
}

impl From<MedicalCondition> for AlertCondition {
    fn from(c: MedicalCondition) -> Self {
        match c {
            MedicalCondition::Diabetes => AlertCondition::Diabetes,
            MedicalCondition::Hypertension => AlertCondition::Hypertension,
            MedicalCondition::Celiac => AlertCondition::Celiac,
            MedicalCondition::KidneyDisease => AlertCondition::KidneyDisease,
        }
    }
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertCondition::Allergy => f.write_str("allergy"),
            AlertCondition::Diabetes => f.write_str("diabetes"),
            AlertCondition::Hypertension => f.write_str("hypertension"),
            AlertCondition::Celiac => f.write_str("celiac"),
            AlertCondition::KidneyDisease => f.write_str("kidney_disease"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Info => f.write_str("info"),
            AlertSeverity::Warning => f.write_str("warning"),
            AlertSeverity::Critical => f.write_str("critical"),
        }
    }
}

/// Heuristic notice raised when a logged food conflicts with the profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAlert {
    pub id: String,
    pub condition: AlertCondition,
    pub title: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub food_item: FoodItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_allergen: Option<String>,
}
