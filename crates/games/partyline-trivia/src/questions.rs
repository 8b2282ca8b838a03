use serde::{Deserialize, Serialize};

/// One multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriviaQuestion {
    pub question: String,
    pub choices: Vec<String>,
    /// Index into `choices`.
    pub answer: usize,
}

impl TriviaQuestion {
    fn is_playable(&self) -> bool {
        !self.question.trim().is_empty()
            && self.choices.len() >= 2
            && self.answer < self.choices.len()
    }
}

/// Parse content rows, skipping anything that isn't a playable question.
pub fn parse_questions(rows: &[serde_json::Value]) -> Vec<TriviaQuestion> {
    rows.iter()
        .filter_map(|row| match serde_json::from_value::<TriviaQuestion>(row.clone()) {
            Ok(q) if q.is_playable() => Some(q),
            Ok(_) => {
                tracing::debug!("Skipping unplayable trivia question");
                None
            },
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed trivia row");
                None
            },
        })
        .collect()
}

fn q(question: &str, choices: &[&str], answer: usize) -> TriviaQuestion {
    TriviaQuestion {
        question: question.to_string(),
        choices: choices.iter().map(|c| c.to_string()).collect(),
        answer,
    }
}

/// Questions used when a room has no content of its own.
pub fn builtin_questions() -> Vec<TriviaQuestion> {
    vec![
        q("Which planet has the most moons?", &["Earth", "Mars", "Saturn", "Venus"], 2),
        q("How many sides does a hexagon have?", &["5", "6", "7", "8"], 1),
        q("What is the chemical symbol for gold?", &["Ag", "Go", "Gd", "Au"], 3),
        q("Which ocean is the largest?", &["Pacific", "Atlantic", "Indian", "Arctic"], 0),
        q(
            "In which year did the first person walk on the Moon?",
            &["1965", "1969", "1972", "1959"],
            1,
        ),
        q("What is the tallest animal on land?", &["Elephant", "Moose", "Giraffe", "Ostrich"], 2),
        q("Which instrument has 88 keys?", &["Organ", "Accordion", "Harp", "Piano"], 3),
        q(
            "What gas do plants absorb from the air?",
            &["Carbon dioxide", "Oxygen", "Nitrogen", "Helium"],
            0,
        ),
    ]
}
