// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
use std::time::Duration;

use backoff::backoff::Backoff;

/// Constant backoff that gives up after a fixed number of retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantWithMaxRetryCount {
    interval: Duration,
    max_retry_count: usize,
    count: usize,
}

impl ConstantWithMaxRetryCount {
    /// Creates a new Constant backoff with `interval` contant
    /// backoff and max retry count `max_retry_count`.
    pub fn new(interval: Duration, max_retry_count: usize) -> Self {
        Self {
            interval,
            max_retry_count,
            count: 0,
        }
    }
}

impl Backoff for ConstantWithMaxRetryCount {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.count < self.max_retry_count {
            self.count += 1;
            Some(self.interval)
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_after_max_retries() {
        let mut backoff =
            ConstantWithMaxRetryCount::new(Duration::from_millis(5), 2);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(5)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(5)));
        assert_eq!(backoff.next_backoff(), None);
        backoff.reset();
        assert!(backoff.next_backoff().is_some());
    }
}
