/*
 *  Copyright 2025 Herald Developers
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

// Timestamps are stored as fixed-width RFC 3339 text in UTC, so text
// comparison orders them chronologically.

diesel::table! {
    apps (id) {
        id -> BigInt,
        name -> Text,
        provider -> Text,
        environment -> Text,
        certificate -> Nullable<Text>,
        password -> Nullable<Text>,
        api_key -> Nullable<Text>,
        connections -> Integer,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    notifications (id) {
        id -> BigInt,
        app_id -> BigInt,
        device_token -> Text,
        payload -> Text,
        expiry -> Nullable<BigInt>,
        deliver_after -> Nullable<Text>,
        delivered -> Bool,
        delivered_at -> Nullable<Text>,
        failed -> Bool,
        failed_at -> Nullable<Text>,
        error_code -> Nullable<Integer>,
        error_description -> Nullable<Text>,
        retries -> Integer,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    invalid_devices (app_id, device_token) {
        app_id -> BigInt,
        device_token -> Text,
        invalidated_at -> Text,
    }
}

diesel::joinable!(notifications -> apps (app_id));
diesel::joinable!(invalid_devices -> apps (app_id));

diesel::allow_tables_to_appear_in_same_query!(apps, notifications, invalid_devices);
