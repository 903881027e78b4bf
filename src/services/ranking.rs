//! Final ordering of recommendation lists.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::models::schemas::{RankMethod, TranslationRecommendation};

/// Order recommendations with the thread-local generator
pub fn sort_recommendations(
    recommendations: Vec<TranslationRecommendation>,
    rank_method: RankMethod,
) -> Vec<TranslationRecommendation> {
    sort_recommendations_with(recommendations, rank_method, &mut rand::rng())
}

/// `Sitelinks` sorts by descending langlinks count (stable); `Default` shuffles.
pub fn sort_recommendations_with<R: Rng + ?Sized>(
    mut recommendations: Vec<TranslationRecommendation>,
    rank_method: RankMethod,
    rng: &mut R,
) -> Vec<TranslationRecommendation> {
    match rank_method {
        RankMethod::Sitelinks => {
            recommendations.sort_by(|a, b| b.langlinks_count.cmp(&a.langlinks_count));
        }
        RankMethod::Default => recommendations.shuffle(rng),
    }
    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn recommendation(title: &str, langlinks_count: u64) -> TranslationRecommendation {
        TranslationRecommendation {
            langlinks_count,
            ..TranslationRecommendation::new(title)
        }
    }

    #[test]
    fn test_sitelinks_ordering_is_non_increasing_and_stable() {
        let input = vec![
            recommendation("a", 3),
            recommendation("b", 40),
            recommendation("c", 3),
            recommendation("d", 0),
            recommendation("e", 17),
        ];

        let sorted = sort_recommendations(input, RankMethod::Sitelinks);

        assert!(sorted.windows(2).all(|w| w[0].langlinks_count >= w[1].langlinks_count));
        let titles: Vec<_> = sorted.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["b", "e", "a", "c", "d"]);
    }

    #[test]
    fn test_default_ordering_is_a_permutation() {
        let input: Vec<_> = (0..20).map(|i| recommendation(&i.to_string(), i)).collect();

        let first = sort_recommendations_with(input.clone(), RankMethod::Default, &mut StdRng::seed_from_u64(7));
        let second = sort_recommendations_with(input.clone(), RankMethod::Default, &mut StdRng::seed_from_u64(7));
        assert_eq!(first, second);

        let mut titles: Vec<_> = first.iter().map(|r| r.langlinks_count).collect();
        titles.sort();
        assert_eq!(titles, (0..20).collect::<Vec<_>>());
    }
}
