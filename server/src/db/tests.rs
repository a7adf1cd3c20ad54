//! Database Integration Tests
//!
//! Each test runs against a freshly migrated database.

#[cfg(test)]
mod postgres_tests {
    use super::super::*;
    use chrono::{Duration, Utc};
    use sqlx::PgPool;
    use uuid::Uuid;

    async fn seed_user(pool: &PgPool, email: &str, approved: bool) -> User {
        let mut conn = pool.acquire().await.expect("acquire");
        insert_user(
            &mut conn,
            &NewUser {
                uuid: Uuid::new_v4(),
                first_name: "Test",
                last_name: "User",
                email,
                password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA",
                external_role: None,
                status: UserStatus::Active,
                is_approved: approved,
                user_origin: UserOrigin::Authcenter,
                two_factor_secret: None,
                is_2fa_enabled: false,
                is_2fa_verified: false,
            },
        )
        .await
        .expect("Failed to create user")
    }

    async fn domain(pool: &PgPool, key: &str) -> Domain {
        let mut conn = pool.acquire().await.expect("acquire");
        find_domain_by_key(&mut conn, key)
            .await
            .expect("Query failed")
            .expect("Seeded domain missing")
    }

    // ========================================================================
    // User Tests
    // ========================================================================

    #[sqlx::test]
    async fn test_create_and_find_user(pool: PgPool) {
        let user = seed_user(&pool, "ada@example.com", true).await;

        assert_eq!(user.role, Role::User);
        assert_eq!(user.status, UserStatus::Active);
        assert_eq!(user.failed_attempts, 0);

        let by_id = find_user_by_id(&pool, user.id).await.unwrap().unwrap();
        assert_eq!(by_id.uuid, user.uuid);

        let by_uuid = find_user_by_uuid(&pool, user.uuid).await.unwrap().unwrap();
        assert_eq!(by_uuid.id, user.id);

        let by_email = find_user_by_email(&pool, "ada@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, user.id);
    }

    #[sqlx::test]
    async fn test_insert_user_creates_oauth_client(pool: PgPool) {
        let user = seed_user(&pool, "client@example.com", true).await;

        let resolved = find_user_by_client_id(&pool, &user.uuid.to_string())
            .await
            .unwrap()
            .expect("client mapping missing");
        assert_eq!(resolved.id, user.id);

        assert!(find_user_by_client_id(&pool, "unknown-client")
            .await
            .unwrap()
            .is_none());
    }

    #[sqlx::test]
    async fn test_email_uniqueness(pool: PgPool) {
        seed_user(&pool, "dup@example.com", true).await;

        let mut conn = pool.acquire().await.unwrap();
        assert!(email_exists(&mut conn, "dup@example.com").await.unwrap());
        assert!(!email_exists(&mut conn, "free@example.com").await.unwrap());

        let err = insert_user(
            &mut conn,
            &NewUser {
                uuid: Uuid::new_v4(),
                first_name: "Other",
                last_name: "",
                email: "dup@example.com",
                password_hash: "x",
                external_role: None,
                status: UserStatus::Active,
                is_approved: false,
                user_origin: UserOrigin::Authcenter,
                two_factor_secret: None,
                is_2fa_enabled: false,
                is_2fa_verified: false,
            },
        )
        .await
        .expect_err("duplicate email accepted");
        assert!(is_unique_violation(&err));
    }

    #[sqlx::test]
    async fn test_uuid_lookup_wins_over_email(pool: PgPool) {
        let by_uuid = seed_user(&pool, "first@example.com", true).await;
        let by_email = seed_user(&pool, "second@example.com", true).await;

        let mut tx = pool.begin().await.unwrap();
        let found = find_user_by_uuid_or_email(&mut tx, by_uuid.uuid, "second@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, by_uuid.id);

        let found = find_user_by_uuid_or_email(&mut tx, Uuid::new_v4(), "second@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, by_email.id);
        tx.rollback().await.unwrap();
    }

    #[sqlx::test]
    async fn test_soft_deleted_users_are_invisible(pool: PgPool) {
        let user = seed_user(&pool, "gone@example.com", true).await;

        assert!(soft_delete_user(&pool, user.id).await.unwrap());
        assert!(!soft_delete_user(&pool, user.id).await.unwrap());

        assert!(find_user_by_uuid(&pool, user.uuid).await.unwrap().is_none());
        assert!(find_user_by_email(&pool, "gone@example.com")
            .await
            .unwrap()
            .is_none());

        // The unique email stays reserved.
        let mut conn = pool.acquire().await.unwrap();
        assert!(email_exists(&mut conn, "gone@example.com").await.unwrap());
    }

    // ========================================================================
    // Lockout Tests
    // ========================================================================

    #[sqlx::test]
    async fn test_failed_logins_lock_at_threshold(pool: PgPool) {
        let user = seed_user(&pool, "lock@example.com", true).await;

        let (count, until) = record_failed_login(&pool, user.id, 3, 300).await.unwrap();
        assert_eq!(count, 1);
        assert!(until.is_none());

        record_failed_login(&pool, user.id, 3, 300).await.unwrap();
        let (count, until) = record_failed_login(&pool, user.id, 3, 300).await.unwrap();
        assert_eq!(count, 3);
        let until = until.expect("lock not applied");
        assert!(until > Utc::now() + Duration::seconds(290));

        // A live lock is not cleared by a successful password check.
        assert!(!clear_failed_logins(&pool, user.id).await.unwrap());

        let statuses = lock_statuses(&pool, &[user.uuid, Uuid::new_v4()]).await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].failed_attempts, 3);
        assert!(statuses[0].locked_until.is_some());

        unlock_user(&pool, user.id).await.unwrap();
        let user = find_user_by_id(&pool, user.id).await.unwrap().unwrap();
        assert_eq!(user.failed_attempts, 0);
        assert!(user.locked_until.is_none());
    }

    #[sqlx::test]
    async fn test_clear_failed_logins_below_threshold(pool: PgPool) {
        let user = seed_user(&pool, "retry@example.com", true).await;

        record_failed_login(&pool, user.id, 3, 300).await.unwrap();
        assert!(clear_failed_logins(&pool, user.id).await.unwrap());

        let user = find_user_by_id(&pool, user.id).await.unwrap().unwrap();
        assert_eq!(user.failed_attempts, 0);
    }

    // ========================================================================
    // Domain Grant Tests
    // ========================================================================

    #[sqlx::test]
    async fn test_attach_is_idempotent(pool: PgPool) {
        let user = seed_user(&pool, "grant@example.com", true).await;
        let jobfinder = domain(&pool, "jobfinder").await;

        let mut conn = pool.acquire().await.unwrap();
        assert!(attach_domain(&mut conn, user.id, jobfinder.id).await.unwrap());
        assert!(!attach_domain(&mut conn, user.id, jobfinder.id).await.unwrap());
        assert!(user_has_domain(&mut conn, user.id, jobfinder.id).await.unwrap());

        assert_eq!(
            domain_ids_for_user(&pool, user.id).await.unwrap(),
            vec![jobfinder.id]
        );
        assert_eq!(
            domain_keys_for_user(&pool, user.id).await.unwrap(),
            vec!["jobfinder".to_string()]
        );

        assert!(detach_domain(&mut conn, user.id, jobfinder.id).await.unwrap());
        assert!(!detach_domain(&mut conn, user.id, jobfinder.id).await.unwrap());
        assert!(!user_has_domain(&mut conn, user.id, jobfinder.id).await.unwrap());
    }

    #[sqlx::test]
    async fn test_satellite_grant_includes_parent(pool: PgPool) {
        let user = seed_user(&pool, "cop@example.com", true).await;
        let cop = domain(&pool, "solucomp_cop").await;
        let solucomp = domain(&pool, "solucomp").await;

        let mut conn = pool.acquire().await.unwrap();
        crate::domains::attach_with_parent(&mut conn, user.id, &cop)
            .await
            .unwrap();
        crate::domains::attach_with_parent(&mut conn, user.id, &cop)
            .await
            .unwrap();

        let mut ids = domain_ids_for_user(&pool, user.id).await.unwrap();
        ids.sort_unstable();
        let mut expected = vec![cop.id, solucomp.id];
        expected.sort_unstable();
        assert_eq!(ids, expected);
    }

    #[sqlx::test]
    async fn test_external_status_map(pool: PgPool) {
        let user = seed_user(&pool, "ext@example.com", true).await;

        set_user_external_status(&pool, user.id, "ccms", "active")
            .await
            .unwrap();
        set_user_external_status(&pool, user.id, "jobfinder", "inactive")
            .await
            .unwrap();
        set_user_external_status(&pool, user.id, "ccms", "inactive")
            .await
            .unwrap();

        let user = find_user_by_id(&pool, user.id).await.unwrap().unwrap();
        assert_eq!(user.external_status_for("ccms"), Some("inactive"));
        assert_eq!(user.external_status_for("jobfinder"), Some("inactive"));
        assert_eq!(user.external_status_for("solucomp"), None);
    }

    // ========================================================================
    // Token Tests
    // ========================================================================

    #[sqlx::test]
    async fn test_refresh_token_validity(pool: PgPool) {
        let user = seed_user(&pool, "refresh@example.com", true).await;
        let live = "a".repeat(64);
        let stale = "b".repeat(64);

        insert_refresh_token(&pool, user.uuid, &live, Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        insert_refresh_token(&pool, user.uuid, &stale, Utc::now() - Duration::hours(1))
            .await
            .unwrap();

        assert!(refresh_token_is_valid(&pool, user.uuid, &live).await.unwrap());
        assert!(!refresh_token_is_valid(&pool, user.uuid, &stale).await.unwrap());
        assert!(!refresh_token_is_valid(&pool, Uuid::new_v4(), &live).await.unwrap());
    }

    #[sqlx::test]
    async fn test_blacklist_purges_expired_entries(pool: PgPool) {
        let user = seed_user(&pool, "logout@example.com", true).await;

        blacklist_jti(&pool, "old-jti", user.id, Utc::now() - Duration::minutes(1))
            .await
            .unwrap();
        blacklist_jti(&pool, "live-jti", user.id, Utc::now() + Duration::minutes(5))
            .await
            .unwrap();
        // Re-blacklisting is a no-op.
        blacklist_jti(&pool, "live-jti", user.id, Utc::now() + Duration::minutes(5))
            .await
            .unwrap();

        assert!(is_jti_blacklisted(&pool, "live-jti").await.unwrap());
        assert!(!is_jti_blacklisted(&pool, "old-jti").await.unwrap());
        assert!(!is_jti_blacklisted(&pool, "never-seen").await.unwrap());
    }

    // ========================================================================
    // Activity and Settings Tests
    // ========================================================================

    #[sqlx::test]
    async fn test_login_activity_dedup_window(pool: PgPool) {
        let user = seed_user(&pool, "activity@example.com", true).await;

        let first = record_activity(&pool, user.id, None, "login", Some("10.0.0.1"), None, Some(5))
            .await
            .unwrap();
        let second = record_activity(&pool, user.id, None, "login", Some("10.0.0.1"), None, Some(5))
            .await
            .unwrap();
        let logout = record_activity(&pool, user.id, None, "logout", None, None, None)
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        assert!(logout);
    }

    #[sqlx::test]
    async fn test_settings_are_versioned(pool: PgPool) {
        let admin = seed_user(&pool, "admin@example.com", true).await;

        let seeded = get_setting(&pool, "enforce_2fa_login")
            .await
            .unwrap()
            .expect("seeded setting");
        assert_eq!(seeded.version, 1);

        let updated = put_setting(
            &pool,
            "enforce_2fa_login",
            serde_json::json!(true),
            1,
            admin.id,
        )
        .await
        .unwrap()
        .expect("write at current version");
        assert_eq!(updated.version, 2);
        assert_eq!(updated.updated_by, Some(admin.id));

        let stale = put_setting(
            &pool,
            "enforce_2fa_login",
            serde_json::json!(false),
            1,
            admin.id,
        )
        .await
        .unwrap();
        assert!(stale.is_none());

        let created = put_setting(&pool, "maintenance", serde_json::json!(false), 0, admin.id)
            .await
            .unwrap()
            .expect("create at version 0");
        assert_eq!(created.version, 1);

        let keys: Vec<String> = list_settings(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.key)
            .collect();
        assert_eq!(keys, vec!["enforce_2fa_login", "maintenance"]);
    }

    #[sqlx::test]
    async fn test_admin_counts(pool: PgPool) {
        seed_user(&pool, "approved@example.com", true).await;
        seed_user(&pool, "waiting@example.com", false).await;

        let counts = admin_counts(&pool).await.unwrap();
        assert_eq!(counts.total_users, 2);
        assert_eq!(counts.un_approved_user_count, 1);
        assert_eq!(counts.total_domains, 5);
        assert_eq!(counts.un_approved_request_count, 0);
    }
}
