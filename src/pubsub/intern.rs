use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

/// Пул `Arc<str>` для фильтров подписок.
///
/// Набор фильтров на устройстве мал и стабилен, а каждый конверт несёт ссылку
/// на совпавший фильтр, поэтому одна аллокация на фильтр вместо одной на
/// доставку. Топики публикаций сюда не попадают: их множество не ограничено.
static FILTER_INTERN: Lazy<DashMap<Box<str>, Arc<str>>> = Lazy::new(DashMap::new);

/// Возвращает interned `Arc<str>` для данного фильтра.
#[inline]
pub(crate) fn intern_filter<S: AsRef<str>>(filter: S) -> Arc<str> {
    let key = filter.as_ref();
    if let Some(existing) = FILTER_INTERN.get(key) {
        return existing.clone();
    }
    FILTER_INTERN
        .entry(Box::from(key))
        .or_insert_with(|| Arc::from(key))
        .clone()
}
