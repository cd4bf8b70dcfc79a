//! Workout and food fact extraction from free-form chat text.
//!
//! Each category is a two-step contract: a marker pattern (`workout` /
//! `food`) must match first, then the optional numeric fields are scanned
//! independently over the whole text. Only the first occurrence of each
//! pattern is used. Numbers are not checked for plausibility.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

static WORKOUT: LazyLock<Regex> = LazyLock::new(|| marker(r"workout:?\s*([^,.]+)"));
static SETS: LazyLock<Regex> = LazyLock::new(|| marker(r"sets:?\s*(\d+)"));
static REPS: LazyLock<Regex> = LazyLock::new(|| marker(r"reps:?\s*(\d+)"));
static WEIGHT: LazyLock<Regex> =
    LazyLock::new(|| marker(r"weight:?\s*(\d+(?:\.\d+)?)\s*(kg|lbs?)?"));
static DURATION: LazyLock<Regex> = LazyLock::new(|| marker(r"duration:?\s*([^,.]+)"));

static FOOD: LazyLock<Regex> = LazyLock::new(|| marker(r"food:?\s*([^,.]+)"));
static CALORIES: LazyLock<Regex> = LazyLock::new(|| marker(r"calories:?\s*(\d+)"));
static PROTEIN: LazyLock<Regex> = LazyLock::new(|| marker(r"protein:?\s*(\d+(?:\.\d+)?)\s*g?"));
static CARBS: LazyLock<Regex> = LazyLock::new(|| marker(r"carbs:?\s*(\d+(?:\.\d+)?)\s*g?"));
static FAT: LazyLock<Regex> = LazyLock::new(|| marker(r"fat:?\s*(\d+(?:\.\d+)?)\s*g?"));

/// Compile a case-insensitive pattern. All patterns are literals above, so a
/// failure here is a programming error caught by the tests.
fn marker(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){pattern}")).expect("extractor pattern must compile")
}

/// Workout facts found in a message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkoutFacts {
    pub exercise: String,
    pub sets: Option<i64>,
    pub reps: Option<i64>,
    pub weight: Option<f64>,
    /// Lowercased `kg`, `lb` or `lbs`; only set alongside `weight`.
    pub weight_unit: Option<String>,
    pub duration: Option<String>,
}

/// Food facts found in a message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoodFacts {
    pub food_name: String,
    pub calories: Option<i64>,
    /// Grams.
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
}

/// Result of scanning one message for both categories.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedLogs {
    pub workout: Option<WorkoutFacts>,
    pub food: Option<FoodFacts>,
}

/// Run both extractors over `text`. The two categories never influence each other.
pub fn scan(text: &str) -> ExtractedLogs {
    ExtractedLogs { workout: extract_workout(text), food: extract_food(text) }
}

/// Match the workout marker and collect the optional fields.
///
/// Returns `None` only when the marker is absent (or its captured span is blank).
pub fn extract_workout(text: &str) -> Option<WorkoutFacts> {
    let exercise = captured_span(&WORKOUT, text)?;

    let weight = WEIGHT.captures(text);
    Some(WorkoutFacts {
        exercise,
        sets: first_int(&SETS, text),
        reps: first_int(&REPS, text),
        weight: weight.as_ref().and_then(|c| group(c, 1)).and_then(|s| s.parse().ok()),
        weight_unit: weight
            .as_ref()
            .and_then(|c| group(c, 2))
            .map(|u| u.to_lowercase()),
        duration: captured_span(&DURATION, text),
    })
}

/// Match the food marker and collect the optional fields.
pub fn extract_food(text: &str) -> Option<FoodFacts> {
    let food_name = captured_span(&FOOD, text)?;

    Some(FoodFacts {
        food_name,
        calories: first_int(&CALORIES, text),
        protein: first_decimal(&PROTEIN, text),
        carbs: first_decimal(&CARBS, text),
        fat: first_decimal(&FAT, text),
    })
}

fn group<'t>(caps: &Captures<'t>, i: usize) -> Option<&'t str> {
    caps.get(i).map(|m| m.as_str())
}

// The colon is optional in the pattern, so a bare "workout:" captures the
// colon itself; strip it along with surrounding whitespace.
fn captured_span(re: &Regex, text: &str) -> Option<String> {
    let caps = re.captures(text)?;
    let span = group(&caps, 1)?.trim_matches(|c: char| c.is_whitespace() || c == ':');
    (!span.is_empty()).then(|| span.to_string())
}

// Digit runs too long for i64 count as absent rather than wrapping.
fn first_int(re: &Regex, text: &str) -> Option<i64> {
    re.captures(text).and_then(|c| group(&c, 1)?.parse().ok())
}

fn first_decimal(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text).and_then(|c| group(&c, 1)?.parse().ok())
}
