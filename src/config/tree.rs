//! Layout of the configuration tree.
use std::time::Duration;

use crate::{context::AttributeReference, logging::LogLevel, Result, Value};

use super::{
    schema::{Field, FieldKind, Nested, Section, Table},
    BackgroundSyncBuilder, BasicLoggingBuilder, ConfigBuilder, EvictionPolicy, LazyLoadBuilder,
    LoggingBuilder, PollingBuilder, RedisSourceBuilder, ServiceEndpointsBuilder, StoreSource,
    StreamingBuilder,
};

pub(super) fn apply(builder: &mut ConfigBuilder, value: &Value) -> Result<()> {
    root().apply(builder, value, "")
}

fn root() -> Table<ConfigBuilder> {
    Table::new(vec![
        Field::new(
            "offline",
            FieldKind::Bool(|b: &mut ConfigBuilder, v| {
                b.offline(v);
            }),
        ),
        Field::new("serviceEndpoints", service_endpoints()),
        Field::new("dataSystem", data_system()),
        Field::new("events", events()),
        Field::new("appInfo", app_info()),
        Field::new("http", http()),
        Field::new("logging", logging()),
    ])
}

fn service_endpoints() -> FieldKind<ConfigBuilder> {
    Nested::field(
        Table::new(vec![
            Field::new(
                "relayProxyBaseURL",
                FieldKind::String(|b: &mut ServiceEndpointsBuilder, v| {
                    b.relay_proxy(v);
                }),
            ),
            Field::new(
                "pollingBaseURL",
                FieldKind::String(|b: &mut ServiceEndpointsBuilder, v| {
                    b.polling_base_url(v);
                }),
            ),
            Field::new(
                "streamingBaseURL",
                FieldKind::String(|b: &mut ServiceEndpointsBuilder, v| {
                    b.streaming_base_url(v);
                }),
            ),
            Field::new(
                "eventsBaseURL",
                FieldKind::String(|b: &mut ServiceEndpointsBuilder, v| {
                    b.events_base_url(v);
                }),
            ),
        ]),
        ServiceEndpointsBuilder::new,
        |b: &mut ConfigBuilder, endpoints: ServiceEndpointsBuilder| {
            b.service_endpoints(endpoints);
            Ok(())
        },
    )
}

fn data_system() -> FieldKind<ConfigBuilder> {
    Table::new(vec![
        Field::new(
            "enabled",
            FieldKind::Bool(|b: &mut ConfigBuilder, v| {
                if !v {
                    b.disable_data_system();
                }
            }),
        ),
        Field::new("backgroundSync", background_sync()),
        Field::new("lazyLoad", lazy_load()),
    ])
    .boxed()
}

fn background_sync() -> FieldKind<ConfigBuilder> {
    let streaming = Nested::field(
        Table::new(vec![Field::new(
            "initialReconnectDelayMs",
            FieldKind::Unsigned(|b: &mut StreamingBuilder, v| {
                b.initial_reconnect_delay(Duration::from_millis(v));
            }),
        )]),
        StreamingBuilder::new,
        |b: &mut BackgroundSyncBuilder, streaming: StreamingBuilder| {
            b.streaming(streaming);
            Ok(())
        },
    );
    let polling = Nested::field(
        Table::new(vec![Field::new(
            "intervalSeconds",
            FieldKind::Unsigned(|b: &mut PollingBuilder, v| {
                b.interval(Duration::from_secs(v));
            }),
        )]),
        PollingBuilder::new,
        |b: &mut BackgroundSyncBuilder, polling: PollingBuilder| {
            b.polling(polling);
            Ok(())
        },
    );

    Nested::field(
        Table::new(vec![
            Field::new("streaming", streaming),
            Field::new("polling", polling),
        ]),
        BackgroundSyncBuilder::new,
        |b: &mut ConfigBuilder, sync: BackgroundSyncBuilder| {
            b.background_sync(sync);
            Ok(())
        },
    )
}

fn lazy_load() -> FieldKind<ConfigBuilder> {
    let redis = Nested::field(
        Table::new(vec![
            Field::new(
                "host",
                FieldKind::String(|b: &mut RedisSourceBuilder, v| {
                    b.host(v);
                }),
            ),
            Field::new(
                "port",
                FieldKind::Unsigned(|b: &mut RedisSourceBuilder, v| b.raw_port(v)),
            ),
            Field::new(
                "prefix",
                FieldKind::String(|b: &mut RedisSourceBuilder, v| {
                    b.prefix(v);
                }),
            ),
            Field::new(
                "poolSize",
                FieldKind::Unsigned(|b: &mut RedisSourceBuilder, v| b.raw_pool_size(v)),
            ),
        ]),
        RedisSourceBuilder::new,
        |b: &mut LazyLoadBuilder, redis: RedisSourceBuilder| {
            b.source(StoreSource::Redis(redis.build()?));
            Ok(())
        },
    );

    Nested::field(
        Table::new(vec![
            Field::new("source", Table::new(vec![Field::new("redis", redis)]).boxed()),
            Field::new(
                "refreshIntervalMs",
                FieldKind::Unsigned(|b: &mut LazyLoadBuilder, v| {
                    b.refresh_interval(Duration::from_millis(v));
                }),
            ),
            Field::new(
                "evictionPolicy",
                // "disabled" is the only policy so far.
                FieldKind::Choice(EvictionPolicy::NAMES, |b: &mut LazyLoadBuilder, _| {
                    b.eviction_policy(EvictionPolicy::Disabled);
                }),
            ),
        ]),
        LazyLoadBuilder::new,
        |b: &mut ConfigBuilder, lazy_load: LazyLoadBuilder| {
            b.lazy_load(lazy_load);
            Ok(())
        },
    )
}

fn events() -> FieldKind<ConfigBuilder> {
    Table::new(vec![
        Field::new(
            "enabled",
            FieldKind::Bool(|b: &mut ConfigBuilder, v| b.events.enabled = v),
        ),
        Field::new(
            "capacity",
            FieldKind::Unsigned(|b: &mut ConfigBuilder, v| b.events.capacity = saturating_usize(v)),
        ),
        Field::new(
            "flushIntervalMs",
            FieldKind::Unsigned(|b: &mut ConfigBuilder, v| {
                b.events.flush_interval = Duration::from_millis(v)
            }),
        ),
        Field::new(
            "allAttributesPrivate",
            FieldKind::Bool(|b: &mut ConfigBuilder, v| b.events.all_attributes_private = v),
        ),
        Field::new(
            "privateAttributes",
            FieldKind::StringList(|b: &mut ConfigBuilder, v| {
                b.events.private_attributes = v.into_iter().map(AttributeReference::new).collect()
            }),
        ),
        Field::new(
            "contextKeysCapacity",
            FieldKind::Unsigned(|b: &mut ConfigBuilder, v| {
                b.events.context_keys_capacity = saturating_usize(v)
            }),
        ),
        Field::new(
            "contextKeysFlushIntervalMs",
            FieldKind::Unsigned(|b: &mut ConfigBuilder, v| {
                b.events.context_keys_flush_interval = Duration::from_millis(v)
            }),
        ),
    ])
    .boxed()
}

fn app_info() -> FieldKind<ConfigBuilder> {
    Table::new(vec![
        Field::new(
            "identifier",
            FieldKind::String(|b: &mut ConfigBuilder, v| b.app_info.identifier = Some(v)),
        ),
        Field::new(
            "version",
            FieldKind::String(|b: &mut ConfigBuilder, v| b.app_info.version = Some(v)),
        ),
    ])
    .boxed()
}

fn http() -> FieldKind<ConfigBuilder> {
    Table::new(vec![
        Field::new(
            "connectTimeoutMs",
            FieldKind::Unsigned(|b: &mut ConfigBuilder, v| {
                b.http.connect_timeout = Duration::from_millis(v)
            }),
        ),
        Field::new(
            "readTimeoutMs",
            FieldKind::Unsigned(|b: &mut ConfigBuilder, v| {
                b.http.read_timeout = Duration::from_millis(v)
            }),
        ),
    ])
    .boxed()
}

fn logging() -> FieldKind<ConfigBuilder> {
    let basic = Nested::field(
        Table::new(vec![
            Field::new(
                "level",
                FieldKind::Choice(LogLevel::NAMES, |b: &mut BasicLoggingBuilder, v| {
                    if let Ok(level) = v.parse() {
                        b.level(level);
                    }
                }),
            ),
            Field::new(
                "tag",
                FieldKind::String(|b: &mut BasicLoggingBuilder, v| {
                    b.tag(v);
                }),
            ),
        ]),
        BasicLoggingBuilder::new,
        |b: &mut ConfigBuilder, basic: BasicLoggingBuilder| {
            b.logging(basic);
            Ok(())
        },
    );

    Table::new(vec![
        Field::new("basic", basic),
        Field::new(
            "disabled",
            FieldKind::Bool(|b: &mut ConfigBuilder, v| {
                if v {
                    b.logging(LoggingBuilder::Disabled);
                }
            }),
        ),
    ])
    .boxed()
}

fn saturating_usize(v: u64) -> usize {
    usize::try_from(v).unwrap_or(usize::MAX)
}
