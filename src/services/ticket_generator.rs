use crate::config::TicketConfig;
use crate::error::{AppError, AppResult};
use rand::Rng;
use std::collections::HashSet;
use std::ops::RangeInclusive;

/// 6 位号码区间
pub const TICKET_RANGE: RangeInclusive<u32> = 100_000..=999_999;

/// 号码来源
pub trait TicketSource: Send + Sync {
    /// 生成 `count` 个不在 `exclude` 中、彼此不重复的号码
    fn generate(&self, count: usize, exclude: &HashSet<String>) -> AppResult<Vec<String>>;
}

/// 生成一笔购买内互不重复的随机号码
#[derive(Clone, Debug)]
pub struct TicketNumberGenerator {
    max_draws_per_ticket: u32,
}

impl TicketNumberGenerator {
    pub fn new(config: &TicketConfig) -> Self {
        Self {
            max_draws_per_ticket: config.max_draws_per_ticket.max(1),
        }
    }

    /// 生成 `count` 个不在 `exclude` 中的号码
    pub fn generate(&self, count: usize, exclude: &HashSet<String>) -> AppResult<Vec<String>> {
        self.generate_with_rng(&mut rand::thread_rng(), count, exclude)
    }

    pub fn generate_with_rng<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        count: usize,
        exclude: &HashSet<String>,
    ) -> AppResult<Vec<String>> {
        let exhausted = || AppError::GenerationExhausted {
            requested: count,
            excluded: exclude.len(),
        };

        let space = (TICKET_RANGE.end() - TICKET_RANGE.start() + 1) as usize;
        if count.saturating_add(exclude.len()) > space {
            return Err(exhausted());
        }

        let mut seen: HashSet<String> = HashSet::with_capacity(count);
        let mut out = Vec::with_capacity(count);
        let budget = (count as u64).saturating_mul(self.max_draws_per_ticket as u64);
        let mut draws: u64 = 0;

        while out.len() < count {
            if draws >= budget {
                return Err(exhausted());
            }
            draws += 1;

            let number = rng.gen_range(TICKET_RANGE).to_string();
            if exclude.contains(&number) || seen.contains(&number) {
                continue;
            }
            seen.insert(number.clone());
            out.push(number);
        }

        Ok(out)
    }
}

impl TicketSource for TicketNumberGenerator {
    fn generate(&self, count: usize, exclude: &HashSet<String>) -> AppResult<Vec<String>> {
        TicketNumberGenerator::generate(self, count, exclude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn generator() -> TicketNumberGenerator {
        TicketNumberGenerator::new(&TicketConfig::default())
    }

    #[test]
    fn test_generate_exact_count_and_format() {
        let numbers = generator().generate(500, &HashSet::new()).unwrap();
        assert_eq!(numbers.len(), 500);
        for n in &numbers {
            assert_eq!(n.len(), 6);
            let value: u32 = n.parse().unwrap();
            assert!(TICKET_RANGE.contains(&value));
        }
        let unique: HashSet<&String> = numbers.iter().collect();
        assert_eq!(unique.len(), numbers.len());
    }

    #[test]
    fn test_generate_respects_exclusions() {
        let exclude: HashSet<String> = (100_000..100_500).map(|n: u32| n.to_string()).collect();
        let numbers = generator().generate(200, &exclude).unwrap();
        assert_eq!(numbers.len(), 200);
        assert!(numbers.iter().all(|n| !exclude.contains(n)));
    }

    #[test]
    fn test_generate_zero_is_empty() {
        assert!(generator().generate(0, &HashSet::new()).unwrap().is_empty());
    }

    #[test]
    fn test_constant_rng_exhausts_instead_of_looping() {
        // 固定随机源: 第一个号码之后每次都碰撞
        let mut rng = StepRng::new(0, 0);
        let err = generator()
            .generate_with_rng(&mut rng, 2, &HashSet::new())
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::GenerationExhausted { requested: 2, .. }
        ));
    }

    #[test]
    fn test_request_larger_than_space_fails_fast() {
        let err = generator().generate(900_001, &HashSet::new()).unwrap_err();
        assert!(matches!(err, AppError::GenerationExhausted { .. }));
    }
}
