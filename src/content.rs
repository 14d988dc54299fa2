//! Statically bundled kiosk content
//!
//! The read-only scenario and UI text tables compiled into the kiosk. The
//! resolver treats these as ground truth: bundled text always wins over
//! stored overrides, and the set of scenario ids defined here decides whether
//! an override payload is valid at all.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::config_manager::models::ImpactValues;

/// One selectable choice inside a scenario
#[derive(Debug, Clone)]
pub struct Choice {
    pub id: String,
    pub fields: BTreeMap<String, String>,
    pub impacts: ImpactValues,
}

/// One branching narrative scenario
#[derive(Debug, Clone)]
pub struct Scenario {
    pub id: String,
    pub fields: BTreeMap<String, String>,
    pub choices: Vec<Choice>,
}

/// Fixed built-in UI text table: (screen, element, language, text)
const FALLBACK_UI_TABLE: &[(&str, &str, &str, &str)] = &[
    ("welcome", "title", "en", "Welcome to Tidepool"),
    ("welcome", "title", "es", "Bienvenido a Tidepool"),
    ("welcome", "start-button", "en", "Touch to begin"),
    ("welcome", "start-button", "es", "Toca para comenzar"),
    ("scenario", "choice-prompt", "en", "What would you do?"),
    ("scenario", "choice-prompt", "es", "¿Qué harías tú?"),
    ("results", "title", "en", "Your ocean impact"),
    ("results", "title", "es", "Tu impacto en el océano"),
    ("results", "restart-button", "en", "Start over"),
    ("results", "restart-button", "es", "Empezar de nuevo"),
    ("admin", "import-button", "en", "Import content"),
    ("admin", "backup-button", "en", "Create backup"),
];

/// The bundled content tables, indexed for lookup
pub struct StaticContent {
    /// Per-language scenario lists, as shipped
    languages: BTreeMap<String, Vec<Scenario>>,
    /// Every scenario id defined in any language
    known_ids: BTreeSet<String>,
    /// Parsed fallback UI table: screen -> element -> language -> text
    fallback_ui: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
}

impl StaticContent {
    /// Index a content bundle; used by tests and alternate bundles
    pub fn new(languages: BTreeMap<String, Vec<Scenario>>) -> Self {
        let known_ids = languages
            .values()
            .flat_map(|scenarios| scenarios.iter().map(|s| s.id.clone()))
            .collect();

        let mut fallback_ui: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>> =
            BTreeMap::new();
        for (screen, element, language, text) in FALLBACK_UI_TABLE {
            fallback_ui
                .entry((*screen).to_string())
                .or_default()
                .entry((*element).to_string())
                .or_default()
                .insert((*language).to_string(), (*text).to_string());
        }

        Self {
            languages,
            known_ids,
            fallback_ui,
        }
    }

    /// The content bundle shipped with the kiosk
    pub fn bundled() -> Arc<StaticContent> {
        Arc::clone(&BUNDLED_CONTENT)
    }

    /// Every scenario id the bundle defines, across all languages
    pub fn known_scenario_ids(&self) -> &BTreeSet<String> {
        &self.known_ids
    }

    /// Languages the bundle ships
    pub fn languages(&self) -> Vec<&str> {
        self.languages.keys().map(String::as_str).collect()
    }

    fn scenario(&self, language: &str, scenario_id: &str) -> Option<&Scenario> {
        self.languages
            .get(language)?
            .iter()
            .find(|s| s.id == scenario_id)
    }

    /// Bundled text for a scenario field
    pub fn scenario_field(
        &self,
        language: &str,
        scenario_id: &str,
        field: &str,
    ) -> Option<String> {
        self.scenario(language, scenario_id)?.fields.get(field).cloned()
    }

    /// Bundled text for a choice field
    pub fn choice_field(
        &self,
        language: &str,
        scenario_id: &str,
        choice_id: &str,
        field: &str,
    ) -> Option<String> {
        self.scenario(language, scenario_id)?
            .choices
            .iter()
            .find(|c| c.id == choice_id)?
            .fields
            .get(field)
            .cloned()
    }

    /// Impact deltas for a choice; impacts are language-independent
    pub fn choice_impacts(&self, scenario_id: &str, choice_id: &str) -> Option<ImpactValues> {
        self.languages.values().find_map(|scenarios| {
            scenarios
                .iter()
                .find(|s| s.id == scenario_id)?
                .choices
                .iter()
                .find(|c| c.id == choice_id)
                .map(|c| c.impacts)
        })
    }

    /// Text from the built-in fallback UI table
    pub fn fallback_ui_text(
        &self,
        screen_id: &str,
        element_id: &str,
        language: &str,
    ) -> Option<String> {
        self.fallback_ui
            .get(screen_id)?
            .get(element_id)?
            .get(language)
            .cloned()
    }
}

fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn choice(id: &str, pairs: &[(&str, &str)], impacts: (i32, i32, i32)) -> Choice {
    Choice {
        id: id.to_string(),
        fields: fields(pairs),
        impacts: ImpactValues {
            ecosystem: impacts.0,
            economic: impacts.1,
            community: impacts.2,
        },
    }
}

fn scenario(id: &str, pairs: &[(&str, &str)], choices: Vec<Choice>) -> Scenario {
    Scenario {
        id: id.to_string(),
        fields: fields(pairs),
        choices,
    }
}

fn english_scenarios() -> Vec<Scenario> {
    vec![
        scenario(
            "plastic-pollution",
            &[
                ("title", "Plastic on the Shore"),
                (
                    "description",
                    "A storm has washed drifts of plastic debris onto the beach near the harbor.",
                ),
                ("question", "The town has limited cleanup funds. What should it do?"),
            ],
            vec![
                choice(
                    "organize-cleanup",
                    &[
                        ("title", "Organize a volunteer cleanup"),
                        ("outcome", "Hundreds of residents turn out and the beach recovers."),
                    ],
                    (18, -5, 22),
                ),
                choice(
                    "ban-single-use",
                    &[
                        ("title", "Ban single-use plastics in town"),
                        ("outcome", "Less debris arrives, but shops must adapt."),
                    ],
                    (25, -12, 8),
                ),
                choice(
                    "wait-for-tide",
                    &[
                        ("title", "Let the tide take it back"),
                        ("outcome", "The debris breaks down into microplastics offshore."),
                    ],
                    (-30, 4, -10),
                ),
            ],
        ),
        scenario(
            "overfishing",
            &[
                ("title", "Empty Nets"),
                (
                    "description",
                    "Catches in the bay have fallen for the third season in a row.",
                ),
                ("question", "The fishing council asks for your recommendation."),
            ],
            vec![
                choice(
                    "seasonal-closure",
                    &[
                        ("title", "Close the fishery for a season"),
                        ("outcome", "Stocks rebound, though the fleet struggles this year."),
                    ],
                    (30, -25, -8),
                ),
                choice(
                    "catch-limits",
                    &[
                        ("title", "Set science-based catch limits"),
                        ("outcome", "Catches stabilize at a sustainable level."),
                    ],
                    (15, -6, 10),
                ),
            ],
        ),
        scenario(
            "coral-bleaching",
            &[
                ("title", "The Pale Reef"),
                (
                    "description",
                    "Divers report that the reef outside the marine park is losing its color.",
                ),
                ("question", "Park managers can fund one response this year."),
            ],
            vec![
                choice(
                    "shade-nursery",
                    &[
                        ("title", "Build a coral nursery"),
                        ("outcome", "Heat-tolerant fragments are ready for replanting."),
                    ],
                    (20, -10, 6),
                ),
                choice(
                    "tourism-cap",
                    &[
                        ("title", "Cap visitor numbers on the reef"),
                        ("outcome", "Stress on the reef drops; tour operators object."),
                    ],
                    (12, -18, -4),
                ),
            ],
        ),
    ]
}

fn spanish_scenarios() -> Vec<Scenario> {
    vec![
        scenario(
            "plastic-pollution",
            &[
                ("title", "Plástico en la orilla"),
                (
                    "description",
                    "Una tormenta ha arrastrado restos de plástico a la playa cercana al puerto.",
                ),
                ("question", "El pueblo tiene fondos limitados. ¿Qué debería hacer?"),
            ],
            vec![
                choice(
                    "organize-cleanup",
                    &[
                        ("title", "Organizar una limpieza voluntaria"),
                        ("outcome", "Cientos de vecinos participan y la playa se recupera."),
                    ],
                    (18, -5, 22),
                ),
                choice(
                    "ban-single-use",
                    &[
                        ("title", "Prohibir los plásticos de un solo uso"),
                        ("outcome", "Llegan menos residuos, pero los comercios deben adaptarse."),
                    ],
                    (25, -12, 8),
                ),
                choice(
                    "wait-for-tide",
                    &[
                        ("title", "Dejar que la marea se lo lleve"),
                        ("outcome", "Los restos se degradan en microplásticos mar adentro."),
                    ],
                    (-30, 4, -10),
                ),
            ],
        ),
        scenario(
            "overfishing",
            &[
                ("title", "Redes vacías"),
                (
                    "description",
                    "Las capturas en la bahía han caído por tercera temporada consecutiva.",
                ),
                ("question", "El consejo pesquero pide tu recomendación."),
            ],
            vec![
                choice(
                    "seasonal-closure",
                    &[
                        ("title", "Cerrar la pesquería una temporada"),
                        ("outcome", "Las poblaciones se recuperan, aunque la flota sufre este año."),
                    ],
                    (30, -25, -8),
                ),
                choice(
                    "catch-limits",
                    &[
                        ("title", "Fijar cuotas con base científica"),
                        ("outcome", "Las capturas se estabilizan en un nivel sostenible."),
                    ],
                    (15, -6, 10),
                ),
            ],
        ),
        scenario(
            "coral-bleaching",
            &[
                ("title", "El arrecife pálido"),
                (
                    "description",
                    "Los buzos informan que el arrecife fuera del parque marino pierde su color.",
                ),
                ("question", "La dirección del parque puede financiar una sola respuesta este año."),
            ],
            vec![
                choice(
                    "shade-nursery",
                    &[
                        ("title", "Construir un vivero de coral"),
                        ("outcome", "Fragmentos tolerantes al calor quedan listos para replantar."),
                    ],
                    (20, -10, 6),
                ),
                choice(
                    "tourism-cap",
                    &[
                        ("title", "Limitar los visitantes al arrecife"),
                        ("outcome", "Baja el estrés del arrecife; los operadores protestan."),
                    ],
                    (12, -18, -4),
                ),
            ],
        ),
    ]
}

lazy_static! {
    static ref BUNDLED_CONTENT: Arc<StaticContent> = {
        let mut languages = BTreeMap::new();
        languages.insert("en".to_string(), english_scenarios());
        languages.insert("es".to_string(), spanish_scenarios());
        Arc::new(StaticContent::new(languages))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_languages_agree_on_ids() {
        let content = StaticContent::bundled();
        assert_eq!(content.languages(), vec!["en", "es"]);
        for language in content.languages() {
            for id in content.known_scenario_ids() {
                assert!(
                    content.scenario_field(language, id, "title").is_some(),
                    "missing {} title for {}",
                    language,
                    id
                );
            }
        }
    }

    #[test]
    fn test_scenario_and_choice_lookup() {
        let content = StaticContent::bundled();
        assert_eq!(
            content.scenario_field("en", "plastic-pollution", "title"),
            Some("Plastic on the Shore".to_string())
        );
        assert_eq!(
            content.choice_field("es", "overfishing", "catch-limits", "title"),
            Some("Fijar cuotas con base científica".to_string())
        );
        assert_eq!(content.scenario_field("en", "ghost-scenario", "title"), None);
        assert_eq!(content.choice_field("en", "overfishing", "ghost", "title"), None);
    }

    #[test]
    fn test_choice_impacts_language_independent() {
        let content = StaticContent::bundled();
        let impacts = content
            .choice_impacts("plastic-pollution", "ban-single-use")
            .unwrap();
        assert_eq!(impacts.ecosystem, 25);
        assert_eq!(impacts.economic, -12);
        assert_eq!(impacts.community, 8);
    }

    #[test]
    fn test_fallback_ui_table() {
        let content = StaticContent::bundled();
        assert_eq!(
            content.fallback_ui_text("welcome", "title", "es"),
            Some("Bienvenido a Tidepool".to_string())
        );
        assert_eq!(content.fallback_ui_text("welcome", "missing", "en"), None);
        assert_eq!(content.fallback_ui_text("admin", "import-button", "es"), None);
    }
}
