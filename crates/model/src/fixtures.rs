//! Order builders for tests.

use chrono::{TimeZone, Utc};
use fake::{Fake, Faker};
use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::{Delivery, Item, Order, Payment};

/// A fixed, fully populated order with one item.
pub fn sample_order(uid: &str) -> Order {
    Order {
        order_uid: uid.to_string(),
        track_number: "WBILMTESTTRACK".to_string(),
        entry: "WBIL".to_string(),
        delivery: Delivery {
            name: "Test Testov".to_string(),
            phone: "+9720000000".to_string(),
            zip: "2639809".to_string(),
            city: "Kiryat Mozkin".to_string(),
            address: "Ploshad Mira 15".to_string(),
            region: "Kraiot".to_string(),
            email: "test@gmail.com".to_string(),
        },
        payment: Payment {
            transaction: uid.to_string(),
            request_id: "".to_string(),
            currency: "USD".to_string(),
            provider: "wbpay".to_string(),
            amount: 1817,
            payment_dt: 1637907727,
            bank: "alpha".to_string(),
            delivery_cost: 1500,
            goods_total: 317,
            custom_fee: 0,
        },
        items: vec![Item {
            chrt_id: 9934930,
            track_number: "WBILMTESTTRACK".to_string(),
            price: 453,
            rid: "ab4219087a764ae0btest".to_string(),
            name: "Mascaras".to_string(),
            sale: 30,
            size: "0".to_string(),
            total_price: 317,
            nm_id: 2389212,
            brand: "Vivienne Sabo".to_string(),
            status: 202,
        }],
        locale: "en".to_string(),
        internal_signature: "".to_string(),
        customer_id: "test".to_string(),
        delivery_service: "meest".to_string(),
        shardkey: "9".to_string(),
        sm_id: 99,
        date_created: Utc.with_ymd_and_hms(2021, 11, 26, 6, 22, 19).unwrap(),
        oof_shard: "1".to_string(),
    }
}

/// A random valid order with up to four items.
pub fn random_order() -> Order {
    let order_uid = Uuid::new_v4().simple().to_string();
    let track_number = Faker.fake::<String>();
    let mut rng = rand::thread_rng();

    let delivery = Delivery {
        name: Faker.fake::<String>(),
        phone: Faker.fake::<String>(),
        zip: Faker.fake::<String>(),
        city: Faker.fake::<String>(),
        address: Faker.fake::<String>(),
        region: Faker.fake::<String>(),
        email: Faker.fake::<String>(),
    };

    let payment = Payment {
        transaction: order_uid.clone(),
        request_id: Uuid::new_v4().to_string(),
        currency: ["USD", "EUR", "GBP", "RUB"].choose(&mut rng).unwrap().to_string(),
        provider: Faker.fake::<String>(),
        amount: (100i64..10_000).fake::<i64>(),
        payment_dt: (1_600_000_000i64..1_800_000_000).fake::<i64>(),
        bank: Faker.fake::<String>(),
        delivery_cost: (0i64..500).fake::<i64>(),
        goods_total: (50i64..5_000).fake::<i64>(),
        custom_fee: (0i64..100).fake::<i64>(),
    };

    let item_count = (0usize..5).fake::<usize>();
    let items = (0..item_count)
        .map(|_| Item {
            chrt_id: (1_000i64..9_999_999).fake::<i64>(),
            track_number: track_number.clone(),
            price: (100i64..1_000).fake::<i64>(),
            rid: Uuid::new_v4().to_string(),
            name: Faker.fake::<String>(),
            sale: (0i64..=100).fake::<i64>(),
            size: ["XS", "S", "M", "L", "XL"].choose(&mut rng).unwrap().to_string(),
            total_price: (100i64..2_000).fake::<i64>(),
            nm_id: (100_000i64..9_999_999).fake::<i64>(),
            brand: Faker.fake::<String>(),
            status: (100i64..300).fake::<i64>(),
        })
        .collect();

    let created = (1_600_000_000i64..1_800_000_000).fake::<i64>();

    Order {
        order_uid,
        track_number,
        entry: Faker.fake::<String>(),
        delivery,
        payment,
        items,
        locale: ["en", "ru", "de", "fr"].choose(&mut rng).unwrap().to_string(),
        internal_signature: Faker.fake::<String>(),
        customer_id: Faker.fake::<String>(),
        delivery_service: Faker.fake::<String>(),
        shardkey: (0u8..10).fake::<u8>().to_string(),
        sm_id: (1i64..100).fake::<i64>(),
        date_created: Utc.timestamp_opt(created, 0).unwrap(),
        oof_shard: (0u8..10).fake::<u8>().to_string(),
    }
}
