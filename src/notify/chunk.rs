//! Split an oversized message on line boundaries into chunks no larger than
//! `limit` bytes.

pub fn chunk_message(body: &str, limit: usize) -> Vec<String> {
    if body.len() <= limit {
        return vec![body.to_string()];
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in body.split_inclusive('\n') {
        if !current.is_empty() && current.len() + line.len() > limit {
            chunks.push(std::mem::take(&mut current));
        }
        if line.len() > limit {
            for piece in line.as_bytes().chunks(limit) {
                chunks.push(String::from_utf8_lossy(piece).into_owned());
            }
            continue;
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_message_is_single_chunk() {
        assert_eq!(chunk_message("hello", 100), vec!["hello".to_string()]);
    }

    #[test]
    fn long_message_splits_on_lines() {
        let body = "a".repeat(10) + "\n" + &"b".repeat(10) + "\n" + &"c".repeat(10);
        let chunks = chunk_message(&body, 15);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.len() <= 16));
    }
}
