/// Points for a correct answer.
pub const CORRECT_POINTS: i64 = 100;

/// Extra points for the first correct answer of a round.
pub const FIRST_CORRECT_BONUS: i64 = 50;

/// Points for one player's answer at the close of a round.
///
/// - Wrong or missing answer: 0
/// - Correct: +100
/// - First correct answer in the round: +50 bonus
pub fn answer_points(correct: bool, first_correct: bool) -> i64 {
    match (correct, first_correct) {
        (false, _) => 0,
        (true, true) => CORRECT_POINTS + FIRST_CORRECT_BONUS,
        (true, false) => CORRECT_POINTS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_answer_scores_nothing() {
        assert_eq!(answer_points(false, false), 0);
        assert_eq!(answer_points(false, true), 0);
    }

    #[test]
    fn first_correct_gets_bonus() {
        assert_eq!(answer_points(true, true), 150);
        assert_eq!(answer_points(true, false), 100);
    }
}
