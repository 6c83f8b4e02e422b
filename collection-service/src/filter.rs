use collector_core::{age_seconds, DateTime, Post, Utc};

/// True if `post` is young enough to count. A post aged exactly `max_age`
/// seconds passes; `None` lets every post through.
pub fn passes(post: &Post, max_age: Option<u64>, now: DateTime<Utc>) -> bool {
    match max_age {
        None => true,
        Some(max_age) => {
            let max_age = i64::try_from(max_age).unwrap_or(i64::MAX);
            age_seconds(post.created_at, now) <= max_age
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post_aged(now: DateTime<Utc>, age: i64) -> Post {
        Post {
            id: format!("p{age}"),
            created_at: DateTime::from_timestamp(now.timestamp() - age, 0).unwrap(),
            num_comments: 0,
            num_crossposts: 0,
            ups: 0,
            url: String::new(),
            is_selftext: false,
            total_awards_received: 0,
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_boundary_age_is_included() {
        assert!(passes(&post_aged(now(), 100), Some(100), now()));
        assert!(!passes(&post_aged(now(), 101), Some(100), now()));
    }

    #[test]
    fn test_no_limit_passes_everything() {
        assert!(passes(&post_aged(now(), 10_000_000), None, now()));
    }

    #[test]
    fn test_future_posts_pass() {
        assert!(passes(&post_aged(now(), -30), Some(0), now()));
    }

    #[test]
    fn test_huge_limit_does_not_overflow() {
        assert!(passes(&post_aged(now(), 10_000_000), Some(u64::MAX), now()));
    }
}
