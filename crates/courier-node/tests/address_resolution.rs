use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use courier_node::{
    AddressError, CachingEndpointAddressRepository, EndpointAddress, EndpointAddressIdentifier,
    EndpointAddressRepository, LayeredEndpointAddressRepository,
};

/// Repository that records every lookup it sees.
struct Recording {
    name: &'static str,
    hit: Option<EndpointAddress>,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl EndpointAddressRepository for Recording {
    async fn find(
        &self,
        id: &EndpointAddressIdentifier,
    ) -> Result<Option<EndpointAddress>, AddressError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.name, id.cache_key()));
        Ok(self.hit.clone())
    }
}

fn address(url: &str) -> EndpointAddress {
    EndpointAddress {
        service: "urn:svc".into(),
        action: "Act".into(),
        asid: Some("123".into()),
        ods_code: None,
        cpa_id: "CPA".into(),
        party_key: "PARTY".into(),
        endpoint_url: url.into(),
        changed_at: None,
    }
}

fn layered(log: &Arc<Mutex<Vec<String>>>) -> LayeredEndpointAddressRepository {
    LayeredEndpointAddressRepository::new(vec![
        Arc::new(Recording {
            name: "R1",
            hit: None,
            log: log.clone(),
        }),
        Arc::new(Recording {
            name: "R2",
            hit: Some(address("X")),
            log: log.clone(),
        }),
        Arc::new(Recording {
            name: "R3",
            hit: Some(address("never")),
            log: log.clone(),
        }),
    ])
}

#[tokio::test]
async fn layered_lookup_queries_in_order_and_returns_first_hit() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let repo = layered(&log);

    let found = repo
        .find_by_asid("urn:svc", "Act", "123")
        .await
        .expect("lookup succeeds")
        .expect("R2 resolves");

    assert_eq!(found.endpoint_url, "X");
    assert_eq!(
        *log.lock().unwrap(),
        ["R1:urn:svc:Act/ASID/123", "R2:urn:svc:Act/ASID/123"]
    );
}

#[tokio::test]
async fn caching_decorator_skips_delegates_on_hit() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let repo = CachingEndpointAddressRepository::new(Arc::new(layered(&log)), 16, false);

    for _ in 0..3 {
        let found = repo
            .find_by_ods_code("urn:svc", "Act", "X26")
            .await
            .expect("lookup succeeds");
        assert_eq!(found.map(|a| a.endpoint_url), Some("X".to_string()));
    }
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn misses_are_retried_against_delegates() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let backing = Recording {
        name: "R1",
        hit: None,
        log: log.clone(),
    };
    let repo = CachingEndpointAddressRepository::new(Arc::new(backing), 16, false);

    for _ in 0..2 {
        assert!(repo
            .find_by_asid("urn:svc", "Act", "404")
            .await
            .expect("lookup succeeds")
            .is_none());
    }
    assert_eq!(log.lock().unwrap().len(), 2);
}
