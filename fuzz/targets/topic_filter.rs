#![no_main]

use libfuzzer_sys::fuzz_target;
use psos::{
    matches,
    pubsub::{validate_filter, validate_topic},
};

fuzz_target!(|input: (&str, &str)| {
    let (filter, topic) = input;
    let filter_ok = validate_filter(filter).is_ok();
    let topic_ok = validate_topic(topic).is_ok();

    let matched = matches(filter, topic);
    if filter_ok && topic_ok {
        if !filter.contains(['+', '#']) {
            assert_eq!(matched, filter == topic);
        }
        if filter == "#" {
            assert!(matched);
        }
    }
});
